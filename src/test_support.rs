//! Test utilities shared across the crate.
//!
//! This module is only compiled during tests (`#[cfg(test)]`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::core::location::{Location, RedirectState};
use crate::core::result::{Redirect, RouteError, Thrown};
use crate::core::route::{
    Action, ActionArgs, Loader, LoaderArgs, LoaderOutput, Match, Route, RouteMatcher,
};
use crate::core::state::Snapshot;
use crate::engine::EngineInit;
use crate::stream::ByteStream;

/// Match for a bare route with no loader, pathname `/id`.
pub fn matched(id: &str) -> Match {
    Match::new(Arc::new(Route::new(id)), format!("/{id}"))
}

/// Match chain from `(id, has_error_boundary, has_catch_boundary)` triples.
pub fn chain_of(routes: &[(&str, bool, bool)]) -> Vec<Match> {
    routes
        .iter()
        .map(|(id, error, catch)| {
            let mut route = Route::new(*id);
            route.has_error_boundary = *error;
            route.has_catch_boundary = *catch;
            Match::new(Arc::new(route), format!("/{id}"))
        })
        .collect()
}

pub fn snapshot_at(location: Location, matches: Vec<Match>) -> Snapshot {
    Snapshot::new(location, matches)
}

type BodyFactory = Arc<dyn Fn() -> Option<ByteStream> + Send + Sync>;

/// Loader that answers immediately, either with a fixed value or a fresh
/// deferred body per call. Counts its calls.
pub struct ValueLoader {
    value: Value,
    body: Option<BodyFactory>,
    calls: Arc<AtomicUsize>,
}

impl ValueLoader {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            body: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn deferred(body: impl Fn() -> Option<ByteStream> + Send + Sync + 'static) -> Self {
        Self {
            value: Value::Null,
            body: Some(Arc::new(body)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Loader for ValueLoader {
    async fn load(&self, _args: LoaderArgs) -> Result<LoaderOutput, Thrown> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.body {
            Some(body) => Ok(LoaderOutput::Deferred(body())),
            None => Ok(LoaderOutput::Data(self.value.clone())),
        }
    }
}

/// Loader that always throws the same thing.
pub struct ThrowingLoader {
    thrown: Thrown,
}

impl ThrowingLoader {
    pub fn new(thrown: impl Into<Thrown>) -> Self {
        Self { thrown: thrown.into() }
    }
}

#[async_trait]
impl Loader for ThrowingLoader {
    async fn load(&self, _args: LoaderArgs) -> Result<LoaderOutput, Thrown> {
        Err(self.thrown.clone())
    }
}

/// Gate held by a test to control a `ControlledLoader`.
pub struct Gate {
    started: Arc<Notify>,
    release: Mutex<Option<oneshot::Sender<Value>>>,
    signal: Arc<Mutex<Option<CancellationToken>>>,
}

impl Gate {
    /// Resolves once the gated call has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    pub fn release(&self, value: Value) {
        if let Some(tx) = self.release.lock().take() {
            // the engine may have dropped the call already
            let _ = tx.send(value);
        }
    }

    /// Whether the gated call's signal has fired.
    pub fn is_cancelled(&self) -> bool {
        self.signal.lock().as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Loader whose first call blocks until the test releases its gate. Later
/// calls answer `"ungated"` right away.
pub struct ControlledLoader {
    started: Arc<Notify>,
    pending: Mutex<Option<oneshot::Receiver<Value>>>,
    signal: Arc<Mutex<Option<CancellationToken>>>,
}

impl ControlledLoader {
    pub fn new() -> (Self, Gate) {
        let started = Arc::new(Notify::new());
        let signal = Arc::new(Mutex::new(None));
        let (tx, rx) = oneshot::channel();
        let loader = Self {
            started: Arc::clone(&started),
            pending: Mutex::new(Some(rx)),
            signal: Arc::clone(&signal),
        };
        let gate = Gate {
            started,
            release: Mutex::new(Some(tx)),
            signal,
        };
        (loader, gate)
    }
}

#[async_trait]
impl Loader for ControlledLoader {
    async fn load(&self, args: LoaderArgs) -> Result<LoaderOutput, Thrown> {
        let pending = self.pending.lock().take();
        let Some(rx) = pending else {
            return Ok(LoaderOutput::Data(json!("ungated")));
        };
        *self.signal.lock() = Some(args.signal.clone());
        self.started.notify_one();
        rx.await
            .map(LoaderOutput::Data)
            .map_err(|_| Thrown::Error(RouteError::new("gate dropped")))
    }
}

/// Raises its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Loader returning a deferred body whose sections the test pushes by hand.
/// The body stays open until the sender is dropped.
pub struct StreamingLoader {
    sections: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    dropped: Arc<AtomicBool>,
}

impl StreamingLoader {
    /// `initial` is sent as the first chunk.
    pub fn new(initial: &str) -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(initial.to_string());
        (
            Self {
                sections: Mutex::new(Some(rx)),
                dropped: Arc::new(AtomicBool::new(false)),
            },
            tx,
        )
    }

    /// Set once whoever reads the body has let go of it.
    pub fn body_dropped(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dropped)
    }
}

#[async_trait]
impl Loader for StreamingLoader {
    async fn load(&self, _args: LoaderArgs) -> Result<LoaderOutput, Thrown> {
        let Some(rx) = self.sections.lock().take() else {
            return Ok(LoaderOutput::Deferred(None));
        };
        let flag = DropFlag(Arc::clone(&self.dropped));
        let body = futures::stream::unfold((rx, flag), |(mut rx, flag)| async move {
            let text = rx.recv().await?;
            Some((Ok(text.into_bytes()), (rx, flag)))
        })
        .boxed();
        Ok(LoaderOutput::Deferred(Some(body)))
    }
}

/// Action answering with a fixed outcome. Records the URLs it was called
/// with.
pub struct ValueAction {
    outcome: Result<Value, Thrown>,
    urls: Arc<Mutex<Vec<Location>>>,
}

impl ValueAction {
    pub fn new(value: Value) -> Self {
        Self {
            outcome: Ok(value),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn throwing(thrown: impl Into<Thrown>) -> Self {
        Self {
            outcome: Err(thrown.into()),
            urls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn redirecting(to: &str) -> Self {
        Self::throwing(Redirect::to(to))
    }

    pub fn seen_urls(&self) -> Arc<Mutex<Vec<Location>>> {
        Arc::clone(&self.urls)
    }
}

#[async_trait]
impl Action for ValueAction {
    async fn call(&self, args: ActionArgs) -> Result<Value, Thrown> {
        self.urls.lock().push(args.url);
        self.outcome.clone()
    }
}

/// Route matcher backed by an exact pathname table. The match at depth `i`
/// gets the first `i` segments of the path as its pathname.
#[derive(Default)]
pub struct TableMatcher {
    table: HashMap<String, Vec<Arc<Route>>>,
}

impl TableMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pathname: &str, chain: &[&Arc<Route>]) -> Self {
        self.table
            .insert(pathname.to_string(), chain.iter().map(|r| Arc::clone(r)).collect());
        self
    }
}

impl RouteMatcher for TableMatcher {
    fn match_routes(&self, _routes: &[Arc<Route>], location: &Location) -> Option<Vec<Match>> {
        let chain = self.table.get(&location.pathname)?;
        let segments: Vec<&str> = location.pathname.split('/').filter(|s| !s.is_empty()).collect();
        Some(
            chain
                .iter()
                .enumerate()
                .map(|(depth, route)| {
                    let take = depth.min(segments.len());
                    Match::new(Arc::clone(route), format!("/{}", segments[..take].join("/")))
                })
                .collect(),
        )
    }
}

/// Captures every snapshot and redirect an engine emits.
#[derive(Clone, Default)]
pub struct Recorder {
    snapshots: Arc<Mutex<Vec<Arc<Snapshot>>>>,
    redirects: Arc<Mutex<Vec<(String, RedirectState)>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, init: EngineInit) -> EngineInit {
        let snapshots = Arc::clone(&self.snapshots);
        let redirects = Arc::clone(&self.redirects);
        init.on_change(move |s| snapshots.lock().push(s))
            .on_redirect(move |href, state| redirects.lock().push((href, state)))
    }

    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.snapshots.lock().clone()
    }

    pub fn transition_kinds(&self) -> Vec<&'static str> {
        self.snapshots.lock().iter().map(|s| s.transition.kind()).collect()
    }

    pub fn redirects(&self) -> Vec<(String, RedirectState)> {
        self.redirects.lock().clone()
    }

    /// Waits (up to a second) for a snapshot matching `pred`.
    pub async fn wait_for(&self, pred: impl Fn(&Snapshot) -> bool) -> Arc<Snapshot> {
        let poll = async {
            loop {
                let found = self.snapshots.lock().iter().rev().find(|s| pred(s)).cloned();
                if let Some(snapshot) = found {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), poll)
            .await
            .expect("no matching snapshot within a second")
    }
}
