//! Waypoint: client-side navigation and data coordination.
//!
//! Feed [`Event`]s into an [`Engine`]; it runs route loaders and actions,
//! cancels whatever the event superseded and publishes a new [`Snapshot`]
//! after every state change.

pub mod core;
pub mod engine;
pub mod stream;

#[cfg(test)]
pub mod test_support;

pub use crate::core::event::Event;
pub use crate::core::location::{Location, RedirectKind, RedirectState};
pub use crate::core::result::{CatchData, Redirect, RouteError, Thrown};
pub use crate::core::route::{
    Action, ActionArgs, Loader, LoaderArgs, LoaderOutput, Match, Route, RouteMatcher, ShouldReload,
    ShouldReloadArgs,
};
pub use crate::core::state::Snapshot;
pub use crate::core::transition::{FormMethod, Submission, Transition};
pub use crate::engine::{Engine, EngineError, EngineInit};
