//! # Boundary Resolution
//!
//! Failures render at the nearest ancestor that declares a boundary for
//! them. Error and catch boundaries are tracked independently. When nothing
//! in the chain declares one, the render layer uses its default boundary at
//! the document root.

use crate::core::result::{CatchData, DataResult, RouteError};
use crate::core::route::Match;

/// Where to render a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boundary {
    Route(String),
    /// No route in the chain declares one.
    Default,
}

impl Boundary {
    pub fn route_id(&self) -> Option<&str> {
        match self {
            Boundary::Route(id) => Some(id),
            Boundary::Default => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    Error,
    Catch,
}

/// Walks `matches` root to leaf and returns the last route with the
/// requested boundary, stopping at (and including) `failing`.
pub fn find_nearest_boundary(failing: &Match, matches: &[Match], kind: BoundaryKind) -> Boundary {
    let mut nearest = Boundary::Default;
    for m in matches {
        let declares = match kind {
            BoundaryKind::Error => m.route.has_error_boundary,
            BoundaryKind::Catch => m.route.has_catch_boundary,
        };
        if declares {
            nearest = Boundary::Route(m.route.id.clone());
        }
        // only search parents
        if m.route.id == failing.route.id {
            break;
        }
    }
    nearest
}

/// Picks the error to show and where.
///
/// An action error wins over a loader error, but when both happened the
/// boundary comes from the loader's route: the chain below it cannot
/// render, so the action's preferred boundary may not exist on screen.
pub fn find_error_and_boundary(
    results: &[DataResult],
    matches: &[Match],
    action_error: Option<&DataResult>,
) -> Option<(RouteError, Boundary)> {
    let loader_error = results.iter().find(|r| r.as_error().is_some());
    let action = action_error.and_then(|r| r.as_error().map(|e| (r, e)));

    match (action, loader_error) {
        (Some((_, err)), Some(loader)) => Some((
            err.clone(),
            find_nearest_boundary(&loader.route_match, matches, BoundaryKind::Error),
        )),
        (Some((action, err)), None) => Some((
            err.clone(),
            find_nearest_boundary(&action.route_match, matches, BoundaryKind::Error),
        )),
        (None, Some(loader)) => loader.as_error().map(|err| {
            (
                err.clone(),
                find_nearest_boundary(&loader.route_match, matches, BoundaryKind::Error),
            )
        }),
        (None, None) => None,
    }
}

/// Picks the catch to show and where, from loader results.
///
/// Returns `None` when no loader caught; an action catch alone is resolved
/// by the caller before loaders run. When both caught, the action's data is
/// shown at the loader route's boundary.
pub fn find_catch_and_boundary(
    results: &[DataResult],
    matches: &[Match],
    action_catch: Option<&DataResult>,
) -> Option<(CatchData, Boundary)> {
    let loader_catch = results.iter().find(|r| r.as_catch().is_some())?;
    let boundary = find_nearest_boundary(&loader_catch.route_match, matches, BoundaryKind::Catch);
    let data = action_catch
        .and_then(DataResult::as_catch)
        .or_else(|| loader_catch.as_catch())?;
    Some((data.clone(), boundary))
}
