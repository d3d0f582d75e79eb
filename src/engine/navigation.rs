//! # Navigation State Machine
//!
//! One page transition at a time. Every navigation event opens a fresh
//! navigation scope, which cancels whatever the previous navigation was
//! still doing, then walks one of these paths:
//!
//! ```text
//! no match ──────────────▶ loading/normalLoad ─tick─▶ 404 catch, idle
//! hash only ─────────────▶ loading/normalLoad ─tick─▶ idle
//! pop ───────────────────▶ loading/normalLoad ──────────────────────────────────▶ load_page_data
//! POST/PUT/PATCH/DELETE ─▶ submitting/actionSubmission ─▶ loading/actionReload ─▶ load_page_data
//! GET form ──────────────▶ submitting/loaderSubmission ─────────────────────────▶ load_page_data
//! redirect marker ───────▶ loading/<redirect kind> ─────────────────────────────▶ load_page_data
//! link ──────────────────▶ loading/normalLoad ──────────────────────────────────▶ load_page_data
//! ```

use log::{debug, warn};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::Engine;
use super::fetch::{abort_stale_fetch_loads, mark_fetch_redirects_done};
use super::loaders::{call_action, call_loaders};
use super::scopes::ScopeKey;
use crate::core::boundary::{
    Boundary, BoundaryKind, find_catch_and_boundary, find_error_and_boundary, find_nearest_boundary,
};
use crate::core::event::HistoryAction;
use crate::core::location::{Location, RedirectKind, RedirectState};
use crate::core::result::{CatchData, DataResult, find_redirect};
use crate::core::revalidation::Revalidation;
use crate::core::route::{Match, target_match};
use crate::core::state::{DeferredRouteData, RouteData, SnapshotPatch, merge_loader_data};
use crate::core::transition::{Submission, Transition};
use crate::stream::DeferredError;

/// Result of the action that started an `actionReload`, carried into the
/// loader pipeline.
struct SubmittedAction {
    route_id: String,
    result: DataResult,
    catch: Option<(CatchData, Boundary)>,
}

impl Engine {
    pub(super) async fn navigate(
        &self,
        action: HistoryAction,
        location: Location,
        submission: Option<Submission>,
    ) {
        let Some(matches) = self.match_routes(&location) else {
            debug!("  handling not found navigation");
            let fallback = self.fallback_matches();
            return self.handle_not_found(location, fallback).await;
        };

        let current = self.snapshot();
        let hash_only = current.location.href() == location.href()
            && current.location.hash != location.hash;

        if submission.is_none() && hash_only {
            debug!("  handling hash change");
            return self.handle_hash_change(location, matches).await;
        }

        // back/forward button, treat all as normal navigation
        if action == HistoryAction::Pop {
            debug!("  handling pop (back/forward button)");
            let transition = Transition::Loading {
                location: location.clone(),
            };
            return self.handle_load(transition, location, matches, None).await;
        }

        match submission {
            Some(submission) if submission.is_action() => {
                debug!("  handling form action submission");
                self.handle_action_submission(location, submission, matches).await;
            }
            Some(submission) => {
                debug!("  handling form loader submission");
                let transition = Transition::SubmittingLoader {
                    location: location.clone(),
                    submission: submission.clone(),
                };
                self.handle_load(transition, location, matches, Some(submission)).await;
            }
            None => {
                let (transition, submission) = self.redirect_transition(&location);
                debug!("  handling {}", transition.kind());
                self.handle_load(transition, location, matches, submission).await;
            }
        }
    }

    /// Transition for a plain navigation, taking the redirect marker on the
    /// location into account. Submission-carrying redirects pick the
    /// submission up from the transition that redirected.
    fn redirect_transition(&self, location: &Location) -> (Transition, Option<Submission>) {
        let location_ = location.clone();
        let carried = |accept: fn(&Transition) -> bool| {
            let current = self.snapshot();
            if accept(&current.transition) {
                current.transition.submission().cloned()
            } else {
                None
            }
        };

        match location.redirect_kind() {
            None => (Transition::Loading { location: location_ }, None),
            Some(RedirectKind::Loader) => {
                (Transition::LoadingRedirect { location: location_ }, None)
            }
            Some(RedirectKind::FetchAction) => (
                Transition::LoadingFetchActionRedirect {
                    location: location_,
                },
                None,
            ),
            Some(RedirectKind::Action) => {
                // a loader may also redirect during the action reload
                match carried(|t| {
                    matches!(
                        t,
                        Transition::SubmittingAction { .. }
                            | Transition::LoadingActionReload { .. }
                    )
                }) {
                    Some(submission) => (
                        Transition::LoadingActionRedirect {
                            location: location_,
                            submission: submission.clone(),
                        },
                        Some(submission),
                    ),
                    None => {
                        warn!(
                            "action redirect without a pending action submission, \
                             loading as a normal redirect"
                        );
                        (Transition::LoadingRedirect { location: location_ }, None)
                    }
                }
            }
            Some(RedirectKind::LoaderSubmission) => {
                match carried(|t| matches!(t, Transition::SubmittingLoader { .. })) {
                    Some(submission) => (
                        Transition::LoadingLoaderSubmissionRedirect {
                            location: location_,
                            submission: submission.clone(),
                        },
                        Some(submission),
                    ),
                    None => {
                        warn!(
                            "loader submission redirect without a pending submission, \
                             loading as a normal redirect"
                        );
                        (Transition::LoadingRedirect { location: location_ }, None)
                    }
                }
            }
        }
    }

    /// Opens a new navigation scope (cancelling the previous one) and
    /// publishes `transition` with `matches` as the pending destination.
    fn begin_navigation(&self, transition: Transition, matches: &[Match]) -> CancellationToken {
        let mut token = None;
        self.update(|st, _| {
            token = Some(st.scopes.open(ScopeKey::Navigation));
            SnapshotPatch {
                transition: Some(transition),
                next_matches: Some(Some(matches.to_vec())),
                ..Default::default()
            }
        });
        token.unwrap_or_default()
    }

    async fn handle_not_found(&self, location: Location, matches: Vec<Match>) {
        let token = self.begin_navigation(
            Transition::Loading {
                location: location.clone(),
            },
            &matches,
        );

        // observers always get to see the pending state
        tokio::task::yield_now().await;

        // routes left behind lose their data and any body still streaming
        if !self.abort_pending_deferred(&token, &matches, &[]) {
            return;
        }

        let boundary = match matches.first() {
            Some(root) => find_nearest_boundary(root, &matches, BoundaryKind::Catch),
            None => Boundary::Default,
        };
        self.update_unless_cancelled(&token, |_, current| {
            SnapshotPatch {
                loader_data: Some(merge_loader_data(&current.loader_data, &[], &matches)),
                location: Some(location),
                matches: Some(matches),
                next_matches: Some(None),
                transition: Some(Transition::Idle),
                ..Default::default()
            }
            .with_catch(Some((CatchData::not_found(), boundary)))
        });
    }

    async fn handle_hash_change(&self, location: Location, matches: Vec<Match>) {
        let token = self.begin_navigation(
            Transition::Loading {
                location: location.clone(),
            },
            &matches,
        );

        tokio::task::yield_now().await;

        self.update_unless_cancelled(&token, |_, _| SnapshotPatch {
            location: Some(location),
            matches: Some(matches),
            next_matches: Some(None),
            transition: Some(Transition::Idle),
            ..Default::default()
        });
    }

    async fn handle_load(
        &self,
        transition: Transition,
        location: Location,
        matches: Vec<Match>,
        submission: Option<Submission>,
    ) {
        let token = self.begin_navigation(transition, &matches);
        self.load_page_data(&token, location, matches, submission, None).await;
    }

    async fn handle_action_submission(
        &self,
        location: Location,
        submission: Submission,
        matches: Vec<Match>,
    ) {
        let token = self.begin_navigation(
            Transition::SubmittingAction {
                location: location.clone(),
                submission: submission.clone(),
            },
            &matches,
        );

        // the index route only handles the action when asked with `?index`
        let action_url = Location::from_href(&submission.action);
        let Some(target) = target_match(&matches, &action_url).cloned() else {
            warn!("matcher returned no matches for {}", location.href());
            self.update_unless_cancelled(&token, |_, _| {
                SnapshotPatch::transition(Transition::Idle)
            });
            return;
        };

        let result = tokio::select! {
            _ = token.cancelled() => {
                debug!("navigation action aborted");
                return;
            }
            result = call_action(&submission, &target, &token) => result,
        };
        if token.is_cancelled() {
            return;
        }

        if let Some(redirect) = result.as_redirect() {
            self.redirect(
                redirect.location.clone(),
                RedirectState {
                    kind: RedirectKind::Action,
                    set_cookie: redirect.set_cookie,
                },
            );
            return;
        }

        let catch = result
            .as_catch()
            .map(|c| (c.clone(), find_nearest_boundary(&target, &matches, BoundaryKind::Catch)));

        let action_data = result.as_value().map(|value| {
            let mut data = RouteData::new();
            data.insert(target.route.id.clone(), value.clone());
            data
        });

        let reload = Transition::LoadingActionReload {
            location: location.clone(),
            submission: submission.clone(),
        };
        let published = self.update_unless_cancelled(&token, |_, _| SnapshotPatch {
            transition: Some(reload),
            action_data: Some(action_data),
            ..Default::default()
        });
        if published.is_none() {
            return;
        }

        let submitted = SubmittedAction {
            route_id: target.route.id.clone(),
            result,
            catch,
        };
        self.load_page_data(&token, location, matches, Some(submission), Some(submitted))
            .await;
    }

    /// Shared loader pipeline: decide what reloads, run it, then commit
    /// everything and go idle in a single update.
    async fn load_page_data(
        &self,
        token: &CancellationToken,
        location: Location,
        matches: Vec<Match>,
        submission: Option<Submission>,
        action: Option<SubmittedAction>,
    ) {
        let load_id = {
            let mut st = self.inner.state.lock();
            if token.is_cancelled() {
                return;
            }
            let id = st.next_load_id();
            st.navigation_load_id = Some(id);
            id
        };

        let action_error = action.as_ref().map(|a| &a.result).filter(|r| r.as_error().is_some());
        let action_catch = action.as_ref().map(|a| &a.result).filter(|r| r.as_catch().is_some());

        // revalidation may call into route hooks, so it runs unlocked
        let current = self.snapshot();
        let to_load = {
            let mut revalidation = Revalidation::new(&current, &location, &matches);
            revalidation.action_failed = action.as_ref().is_some_and(|a| a.result.is_failure());
            revalidation.submission = submission.as_ref();
            revalidation.submission_route_id = action.as_ref().map(|a| a.route_id.as_str());
            revalidation.catch_boundary_id = action
                .as_ref()
                .and_then(|a| a.catch.as_ref())
                .and_then(|(_, boundary)| boundary.route_id());
            revalidation.matches_to_load()
        };
        debug!(
            "calling loaders for {} (load id {}): {:?}",
            location.href(),
            load_id,
            to_load.iter().map(Match::route_id).collect::<Vec<_>>()
        );

        if !self.abort_pending_deferred(token, &matches, &to_load) {
            return;
        }

        let results = tokio::select! {
            _ = token.cancelled() => {
                debug!("navigation loaders aborted");
                return;
            }
            results = call_loaders(&to_load, &location, token) => results,
        };
        if token.is_cancelled() {
            debug!("navigation loaders aborted");
            return;
        }

        if let Some(redirect) = find_redirect(&results) {
            // a loader redirecting during an action reload keeps the
            // submission around, so it replays as an action redirect
            let kind = match self.snapshot().transition {
                Transition::LoadingActionReload { .. } => RedirectKind::Action,
                Transition::SubmittingLoader { .. } => RedirectKind::LoaderSubmission,
                _ => RedirectKind::Loader,
            };
            debug!("navigation loaders redirected to {}", redirect.location);
            self.redirect(
                redirect.location.clone(),
                RedirectState {
                    kind,
                    set_cookie: redirect.set_cookie,
                },
            );
            return;
        }

        let error = find_error_and_boundary(&results, &matches, action_error);
        let catch = find_catch_and_boundary(&results, &matches, action_catch)
            .or_else(|| action.as_ref().and_then(|a| a.catch.clone()));

        let committed = self.update_unless_cancelled(token, |st, current| {
            let mut fetchers = current.fetchers.clone();
            mark_fetch_redirects_done(st, &mut fetchers);
            let aborted = abort_stale_fetch_loads(st, &mut fetchers, load_id);
            if !aborted.is_empty() {
                debug!("marking aborted fetchers as done (keys: {:?})", aborted);
            }

            let mut deferred = DeferredRouteData::new();
            for result in &results {
                let (Some(fields), Some(reader)) = (result.deferred(), result.deferred_scope())
                else {
                    continue;
                };
                // the route's deferred scope is the body reader's own token
                let route_id = result.route_id().to_string();
                st.scopes.adopt(ScopeKey::Deferred(route_id.clone()), reader.clone());
                deferred.insert(route_id, fields.clone());
            }

            if st.navigation_load_id == Some(load_id) {
                st.navigation_load_id = None;
            }

            let action_data = match current.transition {
                Transition::LoadingActionReload { .. } => current.action_data.clone(),
                _ => None,
            };

            SnapshotPatch {
                loader_data: Some(merge_loader_data(&current.loader_data, &results, &matches)),
                location: Some(location),
                matches: Some(matches),
                next_matches: Some(None),
                deferred_loader_data: Some(deferred),
                action_data: Some(action_data),
                transition: Some(Transition::Idle),
                fetchers: Some(fetchers),
                ..Default::default()
            }
            .with_error(error)
            .with_catch(catch)
        });

        if committed.is_some() {
            self.monitor_deferred(&results);
        }
    }

    /// Cancels deferred work for routes that are no longer matched or are
    /// about to reload. Returns false when the navigation itself was
    /// cancelled in the meantime.
    fn abort_pending_deferred(
        &self,
        token: &CancellationToken,
        matches: &[Match],
        to_load: &[Match],
    ) -> bool {
        let mut st = self.inner.state.lock();
        if token.is_cancelled() {
            return false;
        }
        for route_id in st.scopes.deferred_route_ids() {
            let matched = matches.iter().any(|m| m.route.id == route_id);
            let reloading = to_load.iter().any(|m| m.route.id == route_id);
            if !matched || reloading {
                debug!("cancelling deferred data for {}", route_id);
                st.scopes.cancel(&ScopeKey::Deferred(route_id.clone()));
                st.cancelled_deferred.insert(route_id);
            }
        }
        true
    }

    /// Waits on every deferred field from `results` in the background.
    fn monitor_deferred(&self, results: &[DataResult]) {
        for result in results {
            let Some(fields) = result.deferred() else {
                continue;
            };
            let route_id = result.route_id().to_string();
            let scope = self
                .inner
                .state
                .lock()
                .scopes
                .token(&ScopeKey::Deferred(route_id.clone()))
                .cloned();
            let Some(scope) = scope else {
                continue;
            };

            for (field, value) in fields {
                let engine = self.clone();
                let route_id = route_id.clone();
                let field = field.clone();
                let value = value.clone();
                let scope = scope.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = scope.cancelled() => {}
                        settled = value.wait() => {
                            engine.settle_deferred(&scope, &route_id, &field, settled);
                        }
                    }
                });
            }
        }
    }

    /// Moves a resolved deferred field into the route's loader data.
    fn settle_deferred(
        &self,
        scope: &CancellationToken,
        route_id: &str,
        field: &str,
        settled: Result<Value, DeferredError>,
    ) {
        let value = match settled {
            Ok(value) => value,
            Err(DeferredError::Aborted) => {
                debug!("deferred field {} of {} aborted", field, route_id);
                return;
            }
            Err(e) => {
                warn!("deferred field {} of {} failed: {}", field, route_id, e);
                return;
            }
        };

        debug!("deferred field {} of {} resolved", field, route_id);
        self.update_unless_cancelled(scope, |_, current| {
            let mut loader_data = current.loader_data.clone();
            let entry = loader_data
                .entry(route_id.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(map) = entry {
                map.insert(field.to_string(), value);
            }

            let mut deferred = current.deferred_loader_data.clone();
            if let Some(fields) = deferred.get_mut(route_id) {
                fields.remove(field);
            }

            SnapshotPatch {
                loader_data: Some(loader_data),
                deferred_loader_data: Some(deferred),
                ..Default::default()
            }
        });
    }
}
