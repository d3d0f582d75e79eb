//! # Fetchers
//!
//! Keyed, independent loads and submissions that are not tied to a page
//! navigation. Each key moves through its own lifecycle:
//!
//! ```text
//! idle/init ──load──────────▶ loading/normalLoad ─────────▶ idle/done
//!          ──GET submit─────▶ submitting/loaderSubmission ─▶ idle/done
//!          ──POST submit────▶ submitting/actionSubmission
//!                               ├─▶ loading/actionReload ──▶ idle/done
//!                               └─▶ loading/actionRedirect ▶ idle/done
//! ```

use serde_json::Value;

use crate::core::transition::{Phase, Submission};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Fetcher {
    #[default]
    Init,
    SubmittingAction {
        submission: Submission,
        data: Option<Value>,
    },
    SubmittingLoader {
        submission: Submission,
        data: Option<Value>,
    },
    ReloadingAction {
        submission: Submission,
        data: Value,
    },
    LoadingActionRedirect {
        submission: Submission,
    },
    Loading {
        data: Option<Value>,
    },
    Done {
        data: Option<Value>,
    },
}

impl Fetcher {
    pub fn phase(&self) -> Phase {
        match self {
            Fetcher::Init | Fetcher::Done { .. } => Phase::Idle,
            Fetcher::SubmittingAction { .. } | Fetcher::SubmittingLoader { .. } => {
                Phase::Submitting
            }
            Fetcher::ReloadingAction { .. }
            | Fetcher::LoadingActionRedirect { .. }
            | Fetcher::Loading { .. } => Phase::Loading,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Fetcher::Init => "init",
            Fetcher::SubmittingAction { .. } => "actionSubmission",
            Fetcher::SubmittingLoader { .. } => "loaderSubmission",
            Fetcher::ReloadingAction { .. } => "actionReload",
            Fetcher::LoadingActionRedirect { .. } => "actionRedirect",
            Fetcher::Loading { .. } => "normalLoad",
            Fetcher::Done { .. } => "done",
        }
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            Fetcher::Init | Fetcher::LoadingActionRedirect { .. } => None,
            Fetcher::ReloadingAction { data, .. } => Some(data),
            Fetcher::SubmittingAction { data, .. }
            | Fetcher::SubmittingLoader { data, .. }
            | Fetcher::Loading { data }
            | Fetcher::Done { data } => data.as_ref(),
        }
    }

    pub fn submission(&self) -> Option<&Submission> {
        match self {
            Fetcher::SubmittingAction { submission, .. }
            | Fetcher::SubmittingLoader { submission, .. }
            | Fetcher::ReloadingAction { submission, .. }
            | Fetcher::LoadingActionRedirect { submission } => Some(submission),
            _ => None,
        }
    }

    /// Settled copy of this fetcher, keeping whatever data it held.
    pub fn done(&self) -> Fetcher {
        Fetcher::Done {
            data: self.data().cloned(),
        }
    }
}
