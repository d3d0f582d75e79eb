//! # Snapshot State
//!
//! The one object the render layer sees. It is never edited in place:
//! every change builds a new `Snapshot` from the previous one plus a
//! `SnapshotPatch`, swaps it into the `SnapshotStore`, and the engine then
//! fires the change callback with it.
//!
//! ```text
//! Snapshot
//! ├── location / matches           // what is on screen
//! ├── next_matches                 // where a pending navigation is going
//! ├── loader_data                  // route id → loader value
//! ├── deferred_loader_data         // route id → field → pending value
//! ├── action_data                  // route id → last action value
//! ├── transition                   // the global navigation state
//! ├── catch / catch_boundary       // typed catch and where to render it
//! ├── error / error_boundary       // unexpected error and where to render it
//! └── fetchers                     // key → fetcher state
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::core::boundary::Boundary;
use crate::core::fetcher::Fetcher;
use crate::core::location::Location;
use crate::core::result::{CatchData, DataResult, RouteError};
use crate::core::route::Match;
use crate::core::transition::Transition;
use crate::stream::DeferredMap;

pub type RouteData = HashMap<String, Value>;
pub type DeferredRouteData = HashMap<String, DeferredMap>;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub location: Location,
    pub matches: Vec<Match>,
    pub next_matches: Option<Vec<Match>>,
    pub loader_data: RouteData,
    pub deferred_loader_data: DeferredRouteData,
    pub action_data: Option<RouteData>,
    pub transition: Transition,
    pub catch: Option<CatchData>,
    pub error: Option<RouteError>,
    /// `None` when there is no error.
    pub error_boundary: Option<Boundary>,
    /// `None` when there is no catch.
    pub catch_boundary: Option<Boundary>,
    pub fetchers: HashMap<String, Fetcher>,
}

impl Snapshot {
    pub fn new(location: Location, matches: Vec<Match>) -> Self {
        Self {
            location,
            matches,
            next_matches: None,
            loader_data: RouteData::new(),
            deferred_loader_data: DeferredRouteData::new(),
            action_data: None,
            transition: Transition::Idle,
            catch: None,
            error: None,
            error_boundary: None,
            catch_boundary: None,
            fetchers: HashMap::new(),
        }
    }

    /// Fetcher for `key`, or idle/init when the key is unknown.
    pub fn fetcher(&self, key: &str) -> Fetcher {
        self.fetchers.get(key).cloned().unwrap_or_default()
    }

    pub fn route_ids(&self) -> Vec<&str> {
        self.matches.iter().map(Match::route_id).collect()
    }
}

/// Partial update. `None` leaves a field alone; for optional fields,
/// `Some(None)` clears it.
#[derive(Debug, Default)]
pub struct SnapshotPatch {
    pub location: Option<Location>,
    pub matches: Option<Vec<Match>>,
    pub next_matches: Option<Option<Vec<Match>>>,
    pub loader_data: Option<RouteData>,
    pub deferred_loader_data: Option<DeferredRouteData>,
    pub action_data: Option<Option<RouteData>>,
    pub transition: Option<Transition>,
    pub catch: Option<Option<CatchData>>,
    pub error: Option<Option<RouteError>>,
    pub error_boundary: Option<Option<Boundary>>,
    pub catch_boundary: Option<Option<Boundary>>,
    pub fetchers: Option<HashMap<String, Fetcher>>,
}

impl SnapshotPatch {
    pub fn transition(transition: Transition) -> Self {
        Self {
            transition: Some(transition),
            ..Default::default()
        }
    }

    pub fn fetchers(fetchers: HashMap<String, Fetcher>) -> Self {
        Self {
            fetchers: Some(fetchers),
            ..Default::default()
        }
    }

    /// Sets both error and its boundary, or clears both.
    pub fn with_error(mut self, error: Option<(RouteError, Boundary)>) -> Self {
        let (error, boundary) = error.unzip();
        self.error = Some(error);
        self.error_boundary = Some(boundary);
        self
    }

    /// Sets both catch and its boundary, or clears both.
    pub fn with_catch(mut self, catch: Option<(CatchData, Boundary)>) -> Self {
        let (catch, boundary) = catch.unzip();
        self.catch = Some(catch);
        self.catch_boundary = Some(boundary);
        self
    }

    fn apply(self, base: &Snapshot) -> Snapshot {
        let mut next = base.clone();
        if let Some(v) = self.location {
            next.location = v;
        }
        if let Some(v) = self.matches {
            next.matches = v;
        }
        if let Some(v) = self.next_matches {
            next.next_matches = v;
        }
        if let Some(v) = self.loader_data {
            next.loader_data = v;
        }
        if let Some(v) = self.deferred_loader_data {
            next.deferred_loader_data = v;
        }
        if let Some(v) = self.action_data {
            next.action_data = v;
        }
        if let Some(v) = self.transition {
            next.transition = v;
        }
        if let Some(v) = self.catch {
            next.catch = v;
        }
        if let Some(v) = self.error {
            next.error = v;
        }
        if let Some(v) = self.error_boundary {
            next.error_boundary = v;
        }
        if let Some(v) = self.catch_boundary {
            next.catch_boundary = v;
        }
        if let Some(v) = self.fetchers {
            next.fetchers = v;
        }
        next
    }
}

/// Holds the current snapshot. Readers get a cheap `Arc` clone that never
/// changes under them.
#[derive(Debug)]
pub struct SnapshotStore {
    current: Arc<Snapshot>,
}

impl SnapshotStore {
    pub fn new(initial: Snapshot) -> Self {
        Self {
            current: Arc::new(initial),
        }
    }

    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current)
    }

    /// Replaces the snapshot with `patch` applied on top and returns the new
    /// value.
    pub fn apply(&mut self, patch: SnapshotPatch) -> Arc<Snapshot> {
        self.current = Arc::new(patch.apply(&self.current));
        self.current()
    }
}

/// Loader data for `matches`: fresh values from `results`, otherwise what
/// the snapshot already had. Routes not in `matches` are dropped, and a
/// route whose loader failed this time loses its stale value.
pub fn merge_loader_data(base: &RouteData, results: &[DataResult], matches: &[Match]) -> RouteData {
    let fresh: HashMap<&str, &DataResult> = results.iter().map(|r| (r.route_id(), r)).collect();
    matches
        .iter()
        .filter_map(|m| {
            let id = m.route_id();
            let value = match fresh.get(id) {
                Some(result) => result.as_value().cloned(),
                None => base.get(id).cloned(),
            };
            value.map(|v| (id.to_string(), v))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::matched;
    use serde_json::json;

    #[test]
    fn test_apply_replaces_wholesale() {
        let mut store =
            SnapshotStore::new(Snapshot::new(Location::new("/"), vec![matched("root")]));
        let before = store.current();

        let after = store.apply(SnapshotPatch {
            location: Some(Location::new("/next")),
            ..Default::default()
        });

        assert_eq!(before.location.pathname, "/");
        assert_eq!(after.location.pathname, "/next");
        assert_eq!(after.route_ids(), vec!["root"]);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_patch_can_clear_optional_fields() {
        let mut initial = Snapshot::new(Location::new("/"), vec![matched("root")]);
        initial.error = Some(RouteError::new("old"));
        initial.error_boundary = Some(Boundary::Default);
        let mut store = SnapshotStore::new(initial);

        let next = store.apply(SnapshotPatch::default().with_error(None));
        assert!(next.error.is_none());
        assert!(next.error_boundary.is_none());

        let catch = Some((CatchData::not_found(), Boundary::Route("root".into())));
        let next = store.apply(SnapshotPatch::default().with_catch(catch));
        assert_eq!(next.catch.as_ref().map(|c| c.status), Some(404));
        assert_eq!(next.catch_boundary, Some(Boundary::Route("root".into())));
    }

    #[test]
    fn test_unknown_fetcher_is_init() {
        let snapshot = Snapshot::new(Location::new("/"), vec![]);
        assert_eq!(snapshot.fetcher("nope"), Fetcher::Init);
    }

    #[test]
    fn test_merge_loader_data_prefers_fresh_and_drops_unmatched() {
        let base: RouteData = [
            ("root".to_string(), json!("old root")),
            ("gone".to_string(), json!("gone")),
            ("kept".to_string(), json!("kept")),
        ]
        .into_iter()
        .collect();
        let results = vec![DataResult::value(matched("root"), json!("new root"))];
        let matches = vec![matched("root"), matched("kept"), matched("empty")];

        let merged = merge_loader_data(&base, &results, &matches);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["root"], json!("new root"));
        assert_eq!(merged["kept"], json!("kept"));
    }

    #[test]
    fn test_merge_loader_data_drops_failed_route() {
        let base: RouteData = [("root".to_string(), json!("stale"))].into_iter().collect();
        let results = vec![DataResult::error(matched("root"), RouteError::new("x"))];
        let merged = merge_loader_data(&base, &results, &[matched("root")]);
        assert!(merged.is_empty());
    }
}
