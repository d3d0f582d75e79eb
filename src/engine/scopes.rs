//! # Cancellation Scopes
//!
//! Every piece of cancellable work the engine starts lives in one table:
//! the navigation, one entry per fetcher key, and one per route with live
//! deferred data. Opening a scope that already exists cancels the old one.

use std::collections::HashMap;

use log::debug;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    Navigation,
    Fetcher(String),
    Deferred(String),
}

#[derive(Debug, Default)]
pub struct ScopeTable {
    scopes: HashMap<ScopeKey, CancellationToken>,
}

impl ScopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh scope for `key`, cancelling its predecessor.
    pub fn open(&mut self, key: ScopeKey) -> CancellationToken {
        let token = CancellationToken::new();
        self.adopt(key, token.clone());
        token
    }

    /// Registers a token some running work already listens to as `key`'s
    /// scope, cancelling its predecessor.
    pub fn adopt(&mut self, key: ScopeKey, token: CancellationToken) {
        if let Some(previous) = self.scopes.insert(key.clone(), token) {
            debug!("Cancelling superseded scope {:?}", key);
            previous.cancel();
        }
    }

    /// Cancels and forgets `key`. Returns whether it existed.
    pub fn cancel(&mut self, key: &ScopeKey) -> bool {
        match self.scopes.remove(key) {
            Some(token) => {
                debug!("Cancelling scope {:?}", key);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forgets `key` without cancelling it; the work keeps running but can
    /// no longer be aborted through the table.
    pub fn release(&mut self, key: &ScopeKey) -> Option<CancellationToken> {
        self.scopes.remove(key)
    }

    pub fn token(&self, key: &ScopeKey) -> Option<&CancellationToken> {
        self.scopes.get(key)
    }

    pub fn contains(&self, key: &ScopeKey) -> bool {
        self.scopes.contains_key(key)
    }

    /// Route ids that currently own a deferred scope.
    pub fn deferred_route_ids(&self) -> Vec<String> {
        self.scopes
            .keys()
            .filter_map(|k| match k {
                ScopeKey::Deferred(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Cancels every scope matching `filter`.
    pub fn cancel_where(&mut self, filter: impl Fn(&ScopeKey) -> bool) {
        let keys: Vec<ScopeKey> = self.scopes.keys().filter(|k| filter(k)).cloned().collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
