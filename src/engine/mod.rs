//! # Engine
//!
//! Drives the navigation and fetcher state machines and owns every piece of
//! orchestration state: the snapshot store, the cancellation scopes and the
//! load-id bookkeeping. Nothing here is global; one `Engine` is one
//! independent router.
//!
//! ```text
//!              Event
//!                │
//!                ▼
//!        Engine::dispatch()
//!          │            │
//!          ▼            ▼
//!    navigation.rs   fetch.rs ──────────┐
//!          │            │               │
//!          ▼            ▼               ▼
//!      loaders.rs (loader/action calls under a scope token)
//!                │
//!                ▼
//!     update() → SnapshotStore → on_change(Arc<Snapshot>)
//! ```
//!
//! Locking rule: `state` is only held for synchronous bookkeeping. It is
//! released before any await and before calling back into the host
//! (`on_change`, `on_redirect`, `should_reload`).

mod fetch;
mod loaders;
mod navigation;
pub mod scopes;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::boundary::Boundary;
use crate::core::event::Event;
use crate::core::fetcher::Fetcher;
use crate::core::location::{Location, RedirectState};
use crate::core::result::{CatchData, RouteError};
use crate::core::route::{Match, Route, RouteMatcher};
use crate::core::state::{DeferredRouteData, RouteData, Snapshot, SnapshotPatch, SnapshotStore};
use crate::core::transition::Transition;
use scopes::{ScopeKey, ScopeTable};

/// Called with every new snapshot.
pub type ChangeListener = Arc<dyn Fn(Arc<Snapshot>) + Send + Sync>;

/// Called when a loader or action redirected. The host is expected to
/// navigate to the URL with the state attached, which comes back in as a
/// navigation event.
pub type RedirectListener = Arc<dyn Fn(String, RedirectState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The route table has no routes, so there is not even a fallback.
    EmptyRouteTable,
    /// A fetch targeted an href no route matches.
    NoMatch(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::EmptyRouteTable => write!(f, "route table is empty"),
            EngineError::NoMatch(href) => write!(f, "no routes match {href}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Everything needed to bring an engine up, usually what the server
/// rendered for the first page.
pub struct EngineInit {
    pub routes: Vec<Arc<Route>>,
    pub matcher: Arc<dyn RouteMatcher>,
    pub location: Location,
    pub loader_data: RouteData,
    pub deferred_loader_data: DeferredRouteData,
    pub action_data: Option<RouteData>,
    pub catch: Option<CatchData>,
    pub error: Option<RouteError>,
    /// Ignored unless `catch` is set; defaults to `Boundary::Default`.
    pub catch_boundary: Option<Boundary>,
    /// Ignored unless `error` is set; defaults to `Boundary::Default`.
    pub error_boundary: Option<Boundary>,
    pub on_change: ChangeListener,
    pub on_redirect: RedirectListener,
}

impl EngineInit {
    pub fn new(
        routes: Vec<Arc<Route>>,
        matcher: impl RouteMatcher + 'static,
        location: Location,
    ) -> Self {
        Self {
            routes,
            matcher: Arc::new(matcher),
            location,
            loader_data: RouteData::new(),
            deferred_loader_data: DeferredRouteData::new(),
            action_data: None,
            catch: None,
            error: None,
            catch_boundary: None,
            error_boundary: None,
            on_change: Arc::new(|_| {}),
            on_redirect: Arc::new(|_, _| {}),
        }
    }

    pub fn loader_data(mut self, loader_data: RouteData) -> Self {
        self.loader_data = loader_data;
        self
    }

    pub fn on_change(mut self, listener: impl Fn(Arc<Snapshot>) + Send + Sync + 'static) -> Self {
        self.on_change = Arc::new(listener);
        self
    }

    pub fn on_redirect(
        mut self,
        listener: impl Fn(String, RedirectState) + Send + Sync + 'static,
    ) -> Self {
        self.on_redirect = Arc::new(listener);
        self
    }
}

/// Orchestration state guarded by the engine lock.
#[derive(Debug)]
pub(crate) struct EngineState {
    store: SnapshotStore,
    scopes: ScopeTable,
    /// Last load id handed out. Ids start at 1.
    load_counter: u64,
    /// Load id of the navigation pipeline in flight; `None` orders before
    /// every fetcher id.
    navigation_load_id: Option<u64>,
    /// Fetcher keys in their post-action reload, with their load id.
    fetch_reload_ids: HashMap<String, u64>,
    /// Fetcher keys whose action redirected and that wait for the
    /// redirected navigation to land.
    fetch_redirect_ids: HashSet<String>,
    /// Routes whose deferred scope was cancelled since the last idle commit.
    cancelled_deferred: HashSet<String>,
}

impl EngineState {
    fn next_load_id(&mut self) -> u64 {
        self.load_counter += 1;
        self.load_counter
    }
}

struct EngineInner {
    routes: Vec<Arc<Route>>,
    matcher: Arc<dyn RouteMatcher>,
    on_change: ChangeListener,
    on_redirect: RedirectListener,
    state: Mutex<EngineState>,
}

/// Handle to one router instance. Clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(init: EngineInit) -> Result<Self, EngineError> {
        let root = init.routes.first().cloned().ok_or(EngineError::EmptyRouteTable)?;

        // fall back to the root so its catch boundary can take over
        let matches = init
            .matcher
            .match_routes(&init.routes, &init.location)
            .unwrap_or_else(|| vec![Match::new(root, "")]);

        let mut snapshot = Snapshot::new(init.location, matches);
        snapshot.loader_data = init.loader_data;
        snapshot.action_data = init.action_data;
        snapshot.error_boundary = init
            .error
            .as_ref()
            .map(|_| init.error_boundary.unwrap_or(Boundary::Default));
        snapshot.catch_boundary = init
            .catch
            .as_ref()
            .map(|_| init.catch_boundary.unwrap_or(Boundary::Default));
        snapshot.error = init.error;
        snapshot.catch = init.catch;

        // server-provided deferred data can still be cancelled by the first
        // navigation away from its route
        let mut scopes = ScopeTable::new();
        for route_id in init.deferred_loader_data.keys() {
            scopes.open(ScopeKey::Deferred(route_id.clone()));
        }
        snapshot.deferred_loader_data = init.deferred_loader_data;

        info!(
            "Engine ready at {} ({} routes, {} matched)",
            snapshot.location.href(),
            init.routes.len(),
            snapshot.matches.len()
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                routes: init.routes,
                matcher: init.matcher,
                on_change: init.on_change,
                on_redirect: init.on_redirect,
                state: Mutex::new(EngineState {
                    store: SnapshotStore::new(snapshot),
                    scopes,
                    load_counter: 0,
                    navigation_load_id: None,
                    fetch_reload_ids: HashMap::new(),
                    fetch_redirect_ids: HashSet::new(),
                    cancelled_deferred: HashSet::new(),
                }),
            }),
        })
    }

    /// Runs one navigation or fetcher cycle. Resolves when the cycle has
    /// settled or was superseded. Loader and action failures end up in the
    /// snapshot; the only error is a fetch to an href nothing matches.
    pub async fn dispatch(&self, event: Event) -> Result<(), EngineError> {
        match event {
            Event::Navigation {
                action,
                location,
                submission,
            } => {
                debug!("navigation dispatch - {:?} {}", action, location.pathname);
                self.navigate(action, location, submission).await;
                Ok(())
            }
            Event::Fetch {
                key,
                submission,
                href,
            } => {
                debug!(
                    "fetcher dispatch - {:?} {} (key: {})",
                    submission.as_ref().map(|s| s.method),
                    href,
                    key
                );
                self.fetch(key, submission, href).await
            }
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.state.lock().store.current()
    }

    /// State of the fetcher for `key`; idle/init when unknown.
    pub fn fetcher(&self, key: &str) -> Fetcher {
        self.snapshot().fetcher(key)
    }

    /// Cancels any in-flight work for `key` and forgets it.
    pub fn delete_fetcher(&self, key: &str) {
        debug!("deleting fetcher (key: {})", key);
        self.update(|st, current| {
            st.scopes.cancel(&ScopeKey::Fetcher(key.to_string()));
            st.fetch_reload_ids.remove(key);
            st.fetch_redirect_ids.remove(key);
            let mut fetchers = current.fetchers.clone();
            fetchers.remove(key);
            SnapshotPatch::fetchers(fetchers)
        });
    }

    /// Cancels the navigation and every fetcher and deferred scope. The
    /// engine stays usable; late results from cancelled work are dropped.
    pub fn dispose(&self) {
        let mut st = self.inner.state.lock();
        info!("Disposing engine ({} open scopes)", st.scopes.len());
        st.scopes.cancel_where(|_| true);
        st.navigation_load_id = None;
        st.fetch_reload_ids.clear();
    }

    fn match_routes(&self, location: &Location) -> Option<Vec<Match>> {
        self.inner.matcher.match_routes(&self.inner.routes, location)
    }

    /// Single fallback match used when nothing else matches.
    fn fallback_matches(&self) -> Vec<Match> {
        // Engine::new refuses an empty table
        self.inner
            .routes
            .first()
            .map(|root| vec![Match::new(Arc::clone(root), "")])
            .unwrap_or_default()
    }

    fn redirect(&self, location: String, state: RedirectState) {
        info!("redirecting to {} ({:?})", location, state.kind);
        (self.inner.on_redirect)(location, state);
    }

    /// Applies the patch built by `build` and notifies the host.
    fn update<F>(&self, build: F) -> Arc<Snapshot>
    where
        F: FnOnce(&mut EngineState, &Snapshot) -> SnapshotPatch,
    {
        let next = {
            let mut st = self.inner.state.lock();
            Self::commit(&mut st, build)
        };
        (self.inner.on_change)(Arc::clone(&next));
        next
    }

    /// Like `update`, but does nothing when `token` has been cancelled. The
    /// check and the commit happen under one lock, so a cycle that was
    /// superseded can never publish.
    fn update_unless_cancelled<F>(
        &self,
        token: &CancellationToken,
        build: F,
    ) -> Option<Arc<Snapshot>>
    where
        F: FnOnce(&mut EngineState, &Snapshot) -> SnapshotPatch,
    {
        let next = {
            let mut st = self.inner.state.lock();
            if token.is_cancelled() {
                return None;
            }
            Self::commit(&mut st, build)
        };
        (self.inner.on_change)(Arc::clone(&next));
        Some(next)
    }

    fn commit<F>(st: &mut EngineState, build: F) -> Arc<Snapshot>
    where
        F: FnOnce(&mut EngineState, &Snapshot) -> SnapshotPatch,
    {
        let current = st.store.current();
        let mut patch = build(st, &current);

        let settling = patch.transition.as_ref().is_some_and(|transition| {
            debug!("transition set to {}/{}", transition.phase(), transition.kind());
            transition.is_idle()
        });
        if settling {
            Self::settle_navigation(st, &current, &mut patch);
        }

        st.store.apply(patch)
    }

    /// Bookkeeping whenever the transition goes back to idle: the
    /// navigation scope is done, and deferred data survives only for routes
    /// that were not cancelled along the way.
    fn settle_navigation(st: &mut EngineState, current: &Snapshot, patch: &mut SnapshotPatch) {
        st.scopes.release(&ScopeKey::Navigation);

        let deferred = patch.deferred_loader_data.get_or_insert_with(DeferredRouteData::new);
        for (route_id, fields) in &current.deferred_loader_data {
            if !st.cancelled_deferred.contains(route_id) {
                deferred.entry(route_id.clone()).or_insert_with(|| fields.clone());
            }
        }
        st.cancelled_deferred.clear();
    }
}
