//! # Events
//!
//! Everything that drives the engine becomes an `Event`.
//! User clicks a link? That's `Event::Navigation` with `HistoryAction::Push`.
//! A component loads data on the side? That's `Event::Fetch`.
//!
//! ```text
//! Event  →  Engine::dispatch()  →  new Snapshot(s)
//! ```

use crate::core::location::Location;
use crate::core::transition::Submission;

/// How the history stack changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAction {
    Push,
    Replace,
    /// Back/forward button.
    Pop,
}

#[derive(Debug, Clone)]
pub enum Event {
    Navigation {
        action: HistoryAction,
        location: Location,
        submission: Option<Submission>,
    },
    Fetch {
        key: String,
        submission: Option<Submission>,
        href: String,
    },
}

impl Event {
    /// Link click or programmatic navigation.
    pub fn push(location: Location) -> Self {
        Event::Navigation {
            action: HistoryAction::Push,
            location,
            submission: None,
        }
    }

    pub fn pop(location: Location) -> Self {
        Event::Navigation {
            action: HistoryAction::Pop,
            location,
            submission: None,
        }
    }

    /// Page-level form submission.
    pub fn submit(location: Location, submission: Submission) -> Self {
        Event::Navigation {
            action: HistoryAction::Push,
            location,
            submission: Some(submission),
        }
    }

    pub fn fetch(key: impl Into<String>, href: impl Into<String>) -> Self {
        Event::Fetch {
            key: key.into(),
            submission: None,
            href: href.into(),
        }
    }

    pub fn fetch_submit(
        key: impl Into<String>,
        href: impl Into<String>,
        submission: Submission,
    ) -> Self {
        Event::Fetch {
            key: key.into(),
            submission: Some(submission),
            href: href.into(),
        }
    }
}
