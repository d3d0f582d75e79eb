//! Invocation wrappers around route loaders and actions.
//!
//! Whatever a loader or action does, the caller gets a classified
//! `DataResult` back; nothing here returns an error.

use futures::future::join_all;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::core::location::Location;
use crate::core::result::{DataResult, DeferredData, Outcome, RouteError};
use crate::core::route::{ActionArgs, LoaderArgs, LoaderOutput, Match};
use crate::core::transition::Submission;
use crate::stream::parse_deferred;

pub(crate) async fn call_loader(
    route_match: &Match,
    url: &Location,
    signal: &CancellationToken,
) -> DataResult {
    let Some(loader) = route_match.route.loader.clone() else {
        return DataResult::error(
            route_match.clone(),
            RouteError::new(format!("Expected loader for {}", route_match.route.id)),
        );
    };

    debug!("Calling loader for {} ({})", route_match.route.id, url.href());
    let args = LoaderArgs {
        params: route_match.params.clone(),
        url: url.clone(),
        signal: signal.child_token(),
    };

    let outcome = match loader.load(args).await {
        Ok(LoaderOutput::Data(value)) => Outcome::Value {
            value,
            deferred: None,
        },
        Ok(LoaderOutput::Deferred(body)) => {
            // outlives this load: the engine adopts it as the route's
            // deferred scope once the result is committed
            let scope = signal.child_token();
            match parse_deferred(body, scope.clone()).await {
                Ok(parsed) => Outcome::Value {
                    value: parsed.initial.unwrap_or_default(),
                    deferred: Some(DeferredData {
                        fields: parsed.deferred,
                        scope,
                    }),
                },
                Err(e) => Outcome::Error(e.into()),
            }
        }
        Err(thrown) => thrown.into(),
    };

    DataResult {
        route_match: route_match.clone(),
        outcome,
    }
}

/// Runs every loader in `matches` concurrently; results keep match order.
pub(crate) async fn call_loaders(
    matches: &[Match],
    url: &Location,
    signal: &CancellationToken,
) -> Vec<DataResult> {
    join_all(matches.iter().map(|m| call_loader(m, url, signal))).await
}

pub(crate) async fn call_action(
    submission: &Submission,
    route_match: &Match,
    signal: &CancellationToken,
) -> DataResult {
    let Some(action) = route_match.route.action.clone() else {
        return DataResult::error(
            route_match.clone(),
            RouteError::new(format!(
                "Route \"{}\" does not have an action, but you are trying to submit to it",
                route_match.route.id
            )),
        );
    };

    debug!(
        "Calling action for {} ({:?} {})",
        route_match.route.id, submission.method, submission.action
    );
    let args = ActionArgs {
        url: Location::from_href(&submission.action),
        params: route_match.params.clone(),
        submission: submission.clone(),
        signal: signal.child_token(),
    };

    let outcome = match action.call(args).await {
        Ok(value) => Outcome::Value {
            value,
            deferred: None,
        },
        Err(thrown) => thrown.into(),
    };

    DataResult {
        route_match: route_match.clone(),
        outcome,
    }
}
