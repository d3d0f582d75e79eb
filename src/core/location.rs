//! # Locations
//!
//! A `Location` is what the history library hands us: pathname, search and
//! hash, plus an optional redirect descriptor riding along in history state.
//!
//! URL parsing proper is the host's job. The only splitting done here is
//! `from_href`, which cuts an href at `#` and `?` so fetcher targets and
//! redirect destinations can become locations.

use serde::{Deserialize, Serialize};

/// Which flow produced a redirect. Decides the transition type the
/// follow-up navigation is given.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RedirectKind {
    Loader,
    Action,
    LoaderSubmission,
    FetchAction,
}

/// History state attached to a location the engine asked the host to
/// navigate to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RedirectState {
    #[serde(rename = "type")]
    pub kind: RedirectKind,
    pub set_cookie: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub pathname: String,
    /// Query string including the leading `?`, or empty.
    pub search: String,
    /// Fragment including the leading `#`, or empty.
    pub hash: String,
    pub state: Option<RedirectState>,
}

impl Location {
    pub fn new(pathname: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            ..Default::default()
        }
    }

    /// Splits `/path?query#hash` into its parts. Missing parts are empty.
    pub fn from_href(href: &str) -> Self {
        let (rest, hash) = match href.find('#') {
            Some(pos) => (&href[..pos], &href[pos..]),
            None => (href, ""),
        };
        let (pathname, search) = match rest.find('?') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };
        Self {
            pathname: pathname.to_string(),
            search: search.to_string(),
            hash: hash.to_string(),
            state: None,
        }
    }

    pub fn with_state(mut self, state: RedirectState) -> Self {
        self.state = Some(state);
        self
    }

    /// `pathname + search`. The hash never takes part in data loading.
    pub fn href(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }

    /// Query string without the leading `?`.
    pub fn query(&self) -> &str {
        self.search.strip_prefix('?').unwrap_or(&self.search)
    }

    pub fn redirect_kind(&self) -> Option<RedirectKind> {
        self.state.map(|s| s.kind)
    }

    pub fn set_cookie(&self) -> bool {
        self.state.is_some_and(|s| s.set_cookie)
    }

    /// True when the query carries a bare `index` flag (`?index`, not
    /// `?index=1`), which targets the index route instead of its layout.
    pub fn is_index_request(&self) -> bool {
        self.query()
            .split('&')
            .any(|pair| pair == "index" || pair == "index=")
    }
}
