//! # Transitions
//!
//! The single, global, in-flight navigation state. Exactly one `Transition`
//! exists at a time; it is replaced as a value on every step.
//!
//! ```text
//! idle
//! submitting/actionSubmission      <Form method="post">
//! submitting/loaderSubmission      <Form method="get">
//! loading/normalLoad               link, back/forward, not found, hash change
//! loading/normalRedirect           loader redirected
//! loading/actionReload             action done, reloading loaders
//! loading/actionRedirect           action redirected
//! loading/loaderSubmissionRedirect GET form loader redirected
//! loading/fetchActionRedirect      fetcher action redirected
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::location::Location;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl FormMethod {
    /// POST/PUT/PATCH/DELETE run an action; GET runs loaders.
    pub fn is_mutation(self) -> bool {
        !matches!(self, FormMethod::Get)
    }
}

pub const DEFAULT_ENC_TYPE: &str = "application/x-www-form-urlencoded";

/// Form-like input driving a loader (GET) or an action (everything else).
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// URL the form posts to.
    pub action: String,
    pub method: FormMethod,
    /// Ordered form fields.
    pub body: Vec<(String, String)>,
    pub enc_type: String,
    pub key: String,
}

impl Submission {
    /// New submission with an empty body and a fresh random key.
    pub fn new(method: FormMethod, action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method,
            body: Vec::new(),
            enc_type: DEFAULT_ENC_TYPE.to_string(),
            key: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.body.push((name.into(), value.into()));
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn is_action(&self) -> bool {
        self.method.is_mutation()
    }

    pub fn is_loader(&self) -> bool {
        !self.is_action()
    }
}

/// Coarse phase shared by transitions and fetchers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Submitting,
    Loading,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Submitting => "submitting",
            Phase::Loading => "loading",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Transition {
    #[default]
    Idle,
    SubmittingAction {
        location: Location,
        submission: Submission,
    },
    SubmittingLoader {
        location: Location,
        submission: Submission,
    },
    Loading {
        location: Location,
    },
    LoadingRedirect {
        location: Location,
    },
    LoadingActionReload {
        location: Location,
        submission: Submission,
    },
    LoadingActionRedirect {
        location: Location,
        submission: Submission,
    },
    LoadingLoaderSubmissionRedirect {
        location: Location,
        submission: Submission,
    },
    LoadingFetchActionRedirect {
        location: Location,
    },
}

impl Transition {
    pub fn phase(&self) -> Phase {
        match self {
            Transition::Idle => Phase::Idle,
            Transition::SubmittingAction { .. } | Transition::SubmittingLoader { .. } => {
                Phase::Submitting
            }
            _ => Phase::Loading,
        }
    }

    /// Sub-type name as the render layer knows it.
    pub fn kind(&self) -> &'static str {
        match self {
            Transition::Idle => "idle",
            Transition::SubmittingAction { .. } => "actionSubmission",
            Transition::SubmittingLoader { .. } => "loaderSubmission",
            Transition::Loading { .. } => "normalLoad",
            Transition::LoadingRedirect { .. } => "normalRedirect",
            Transition::LoadingActionReload { .. } => "actionReload",
            Transition::LoadingActionRedirect { .. } => "actionRedirect",
            Transition::LoadingLoaderSubmissionRedirect { .. } => "loaderSubmissionRedirect",
            Transition::LoadingFetchActionRedirect { .. } => "fetchActionRedirect",
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Transition::Idle => None,
            Transition::SubmittingAction { location, .. }
            | Transition::SubmittingLoader { location, .. }
            | Transition::Loading { location }
            | Transition::LoadingRedirect { location }
            | Transition::LoadingActionReload { location, .. }
            | Transition::LoadingActionRedirect { location, .. }
            | Transition::LoadingLoaderSubmissionRedirect { location, .. }
            | Transition::LoadingFetchActionRedirect { location } => Some(location),
        }
    }

    pub fn submission(&self) -> Option<&Submission> {
        match self {
            Transition::SubmittingAction { submission, .. }
            | Transition::SubmittingLoader { submission, .. }
            | Transition::LoadingActionReload { submission, .. }
            | Transition::LoadingActionRedirect { submission, .. }
            | Transition::LoadingLoaderSubmissionRedirect { submission, .. } => Some(submission),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Transition::Idle)
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == Phase::Loading
    }

    /// Transitions that follow a completed mutation and therefore
    /// revalidate every loader.
    pub fn follows_mutation(&self) -> bool {
        matches!(
            self,
            Transition::LoadingActionReload { .. }
                | Transition::LoadingActionRedirect { .. }
                | Transition::LoadingFetchActionRedirect { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_methods() {
        assert!(!FormMethod::Get.is_mutation());
        for method in [FormMethod::Post, FormMethod::Put, FormMethod::Patch, FormMethod::Delete] {
            assert!(method.is_mutation(), "{method:?}");
        }
    }

    #[test]
    fn test_submission_keys_are_unique() {
        let a = Submission::new(FormMethod::Post, "/a");
        let b = Submission::new(FormMethod::Post, "/a");
        assert_ne!(a.key, b.key);
        assert_eq!(a.enc_type, DEFAULT_ENC_TYPE);
        assert_eq!(a.with_key("k").key, "k");
    }

    #[test]
    fn test_transition_phase_and_kind() {
        let location = Location::new("/x");
        let submission = Submission::new(FormMethod::Post, "/x");
        let t = Transition::LoadingActionReload {
            location: location.clone(),
            submission: submission.clone(),
        };
        assert_eq!(t.phase(), Phase::Loading);
        assert_eq!(t.kind(), "actionReload");
        assert_eq!(t.location(), Some(&location));
        assert_eq!(t.submission(), Some(&submission));
        assert!(t.follows_mutation());

        let t = Transition::Loading { location };
        assert_eq!(t.kind(), "normalLoad");
        assert!(t.submission().is_none());
        assert!(!t.follows_mutation());

        assert_eq!(Transition::Idle.phase(), Phase::Idle);
        assert!(Transition::Idle.location().is_none());
    }
}
