//! # Loader and Action Results
//!
//! Loaders and actions finish in one of four ways: a value, a redirect, a
//! typed catch (an intentional non-2xx style response) or an unexpected
//! error. The last three are what a route "throws"; here they are the
//! explicit `Thrown` enum so classification is a plain `match` over its
//! variants.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::route::Match;
use crate::stream::DeferredMap;

/// Unexpected failure in a loader or action.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RouteError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RouteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RouteError {}

/// Payload of a thrown catch: status line plus arbitrary data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatchData {
    pub status: u16,
    pub status_text: String,
    pub data: Value,
}

impl CatchData {
    pub fn not_found() -> Self {
        Self {
            status: 404,
            status_text: "Not Found".to_string(),
            data: Value::Null,
        }
    }
}

/// Control transfer to another URL. Not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub set_cookie: bool,
}

impl Redirect {
    pub fn to(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            set_cookie: false,
        }
    }
}

/// Everything a loader or action can "throw".
#[derive(Debug, Clone, PartialEq)]
pub enum Thrown {
    Redirect(Redirect),
    Catch(CatchData),
    Error(RouteError),
}

impl From<RouteError> for Thrown {
    fn from(err: RouteError) -> Self {
        Thrown::Error(err)
    }
}

impl From<Redirect> for Thrown {
    fn from(redirect: Redirect) -> Self {
        Thrown::Redirect(redirect)
    }
}

impl From<CatchData> for Thrown {
    fn from(catch: CatchData) -> Self {
        Thrown::Catch(catch)
    }
}

/// Pending fields of a streamed loader body, plus the token that stops
/// the task still reading it.
#[derive(Debug, Clone)]
pub struct DeferredData {
    pub fields: DeferredMap,
    pub scope: CancellationToken,
}

/// Classified outcome of one loader/action invocation.
#[derive(Debug, Clone)]
pub enum Outcome {
    Value {
        value: Value,
        deferred: Option<DeferredData>,
    },
    Redirect(Redirect),
    Catch(CatchData),
    Error(RouteError),
}

impl From<Thrown> for Outcome {
    fn from(thrown: Thrown) -> Self {
        match thrown {
            Thrown::Redirect(r) => Outcome::Redirect(r),
            Thrown::Catch(c) => Outcome::Catch(c),
            Thrown::Error(e) => Outcome::Error(e),
        }
    }
}

/// An outcome paired with the match that produced it.
#[derive(Debug, Clone)]
pub struct DataResult {
    pub route_match: Match,
    pub outcome: Outcome,
}

impl DataResult {
    pub fn value(route_match: Match, value: Value) -> Self {
        Self {
            route_match,
            outcome: Outcome::Value {
                value,
                deferred: None,
            },
        }
    }

    pub fn error(route_match: Match, err: RouteError) -> Self {
        Self {
            route_match,
            outcome: Outcome::Error(err),
        }
    }

    pub fn route_id(&self) -> &str {
        &self.route_match.route.id
    }

    pub fn as_value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Value { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_redirect(&self) -> Option<&Redirect> {
        match &self.outcome {
            Outcome::Redirect(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_catch(&self) -> Option<&CatchData> {
        match &self.outcome {
            Outcome::Catch(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&RouteError> {
        match &self.outcome {
            Outcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Catch(_) | Outcome::Error(_))
    }

    pub fn deferred(&self) -> Option<&DeferredMap> {
        match &self.outcome {
            Outcome::Value { deferred, .. } => deferred.as_ref().map(|d| &d.fields),
            _ => None,
        }
    }

    /// Token cancelling the reader of this result's deferred body.
    pub fn deferred_scope(&self) -> Option<&CancellationToken> {
        match &self.outcome {
            Outcome::Value {
                deferred: Some(d), ..
            } => Some(&d.scope),
            _ => None,
        }
    }
}

/// First redirect among `results`, in match order.
pub fn find_redirect(results: &[DataResult]) -> Option<&Redirect> {
    results.iter().find_map(DataResult::as_redirect)
}
