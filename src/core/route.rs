//! # Routes and Matches
//!
//! The route table and the matcher are supplied by the host. This module
//! only defines their shape: what a route owns (loader, action,
//! revalidation hook, boundary flags) and what the engine expects back from
//! matching a location.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::location::Location;
use crate::core::result::Thrown;
use crate::core::transition::Submission;
use crate::stream::ByteStream;

pub type Params = HashMap<String, String>;

/// What a loader hands back on success.
pub enum LoaderOutput {
    Data(Value),
    /// A streamed body in the deferred wire format. `None` for an empty body.
    Deferred(Option<ByteStream>),
}

impl fmt::Debug for LoaderOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderOutput::Data(v) => f.debug_tuple("Data").field(v).finish(),
            LoaderOutput::Deferred(body) => f
                .debug_tuple("Deferred")
                .field(&body.as_ref().map(|_| "<stream>"))
                .finish(),
        }
    }
}

impl From<Value> for LoaderOutput {
    fn from(value: Value) -> Self {
        LoaderOutput::Data(value)
    }
}

pub struct LoaderArgs {
    pub params: Params,
    pub url: Location,
    /// Cancelled when the navigation or fetcher that asked for this load is
    /// superseded. Loaders should stop work when it fires.
    pub signal: CancellationToken,
}

pub struct ActionArgs {
    pub url: Location,
    pub params: Params,
    pub submission: Submission,
    pub signal: CancellationToken,
}

pub struct ShouldReloadArgs<'a> {
    pub previous_url: &'a Location,
    pub url: &'a Location,
    pub submission: Option<&'a Submission>,
    pub params: &'a Params,
}

#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, args: LoaderArgs) -> Result<LoaderOutput, Thrown>;
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn call(&self, args: ActionArgs) -> Result<Value, Thrown>;
}

/// Route-level override for revalidation after mutations, reloads of the
/// same URL and search changes.
pub trait ShouldReload: Send + Sync {
    fn should_reload(&self, args: ShouldReloadArgs<'_>) -> bool;
}

impl<F> ShouldReload for F
where
    F: Fn(ShouldReloadArgs<'_>) -> bool + Send + Sync,
{
    fn should_reload(&self, args: ShouldReloadArgs<'_>) -> bool {
        self(args)
    }
}

/// A route record. Ids are unique and stable across the table.
#[derive(Default)]
pub struct Route {
    pub id: String,
    pub path: Option<String>,
    pub index: bool,
    pub loader: Option<Arc<dyn Loader>>,
    pub action: Option<Arc<dyn Action>>,
    pub should_reload: Option<Arc<dyn ShouldReload>>,
    pub has_error_boundary: bool,
    pub has_catch_boundary: bool,
}

impl Route {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub fn action(mut self, action: impl Action + 'static) -> Self {
        self.action = Some(Arc::new(action));
        self
    }

    pub fn should_reload<F>(mut self, hook: F) -> Self
    where
        F: Fn(ShouldReloadArgs<'_>) -> bool + Send + Sync + 'static,
    {
        self.should_reload = Some(Arc::new(hook));
        self
    }

    pub fn error_boundary(mut self) -> Self {
        self.has_error_boundary = true;
        self
    }

    pub fn catch_boundary(mut self) -> Self {
        self.has_catch_boundary = true;
        self
    }

    /// True for splat routes, whose trailing `*` param is not part of the
    /// matched pathname comparison.
    pub fn is_splat(&self) -> bool {
        self.path.as_deref().is_some_and(|p| p.ends_with('*'))
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("index", &self.index)
            .field("loader", &self.loader.is_some())
            .field("action", &self.action.is_some())
            .field("should_reload", &self.should_reload.is_some())
            .field("has_error_boundary", &self.has_error_boundary)
            .field("has_catch_boundary", &self.has_catch_boundary)
            .finish()
    }
}

/// A route paired with the params and pathname it matched.
#[derive(Debug, Clone)]
pub struct Match {
    pub route: Arc<Route>,
    pub params: Params,
    pub pathname: String,
}

impl Match {
    pub fn new(route: Arc<Route>, pathname: impl Into<String>) -> Self {
        Self {
            route,
            params: Params::new(),
            pathname: pathname.into(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn route_id(&self) -> &str {
        &self.route.id
    }
}

/// Resolves a location against the route table, root to leaf.
pub trait RouteMatcher: Send + Sync {
    fn match_routes(&self, routes: &[Arc<Route>], location: &Location) -> Option<Vec<Match>>;
}

impl<F> RouteMatcher for F
where
    F: Fn(&[Arc<Route>], &Location) -> Option<Vec<Match>> + Send + Sync,
{
    fn match_routes(&self, routes: &[Arc<Route>], location: &Location) -> Option<Vec<Match>> {
        self(routes, location)
    }
}

/// The match a submission or fetch targets: the leaf, unless the leaf is an
/// index route and the URL does not ask for it with a bare `?index`, in
/// which case its parent layout is the target.
pub fn target_match<'a>(matches: &'a [Match], url: &Location) -> Option<&'a Match> {
    let leaf = matches.last()?;
    if leaf.route.index && !url.is_index_request() && matches.len() > 1 {
        return matches.get(matches.len() - 2);
    }
    Some(leaf)
}
