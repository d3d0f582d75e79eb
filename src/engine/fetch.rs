//! # Fetcher State Machine
//!
//! Keyed loads and submissions that run beside the page transition. Each
//! key has its own scope; starting a new cycle for a key cancels the one in
//! flight. Fetchers only touch the navigation in two places: a fetcher
//! reload that lands after a slower navigation load settles that navigation
//! itself, and an action redirect, which is replayed through the same
//! `on_redirect` path as navigation redirects.

use std::collections::HashMap;

use log::debug;
use tokio_util::sync::CancellationToken;

use super::loaders::{call_action, call_loader, call_loaders};
use super::scopes::ScopeKey;
use super::{Engine, EngineError, EngineState};
use crate::core::boundary::{
    BoundaryKind, find_catch_and_boundary, find_error_and_boundary, find_nearest_boundary,
};
use crate::core::fetcher::Fetcher;
use crate::core::location::{Location, RedirectKind, RedirectState};
use crate::core::result::{CatchData, Outcome, RouteError, find_redirect};
use crate::core::revalidation::Revalidation;
use crate::core::route::{Match, target_match};
use crate::core::state::{Snapshot, SnapshotPatch, merge_loader_data};
use crate::core::transition::{Phase, Submission, Transition};

impl Engine {
    pub(super) async fn fetch(
        &self,
        key: String,
        submission: Option<Submission>,
        href: String,
    ) -> Result<(), EngineError> {
        let url = Location::from_href(&href);
        let matches = self
            .match_routes(&url)
            .ok_or_else(|| EngineError::NoMatch(href.clone()))?;
        let target = target_match(&matches, &url)
            .cloned()
            .ok_or_else(|| EngineError::NoMatch(href.clone()))?;

        match submission {
            Some(submission) if submission.is_action() => {
                debug!("  handling fetcher action submission (key: {})", key);
                self.handle_action_fetch(key, submission, target).await;
            }
            Some(submission) => {
                debug!("  handling fetcher loader submission (key: {})", key);
                self.handle_loader_fetch(key, url, target, Some(submission)).await;
            }
            None => {
                debug!("  handling fetcher load (key: {})", key);
                self.handle_loader_fetch(key, url, target, None).await;
            }
        }
        Ok(())
    }

    /// Opens the key's scope, cancelling its previous cycle, and publishes
    /// the fetcher built from whatever data the key held before.
    fn begin_fetch(
        &self,
        key: &str,
        build: impl FnOnce(Option<serde_json::Value>) -> Fetcher,
    ) -> CancellationToken {
        let mut token = None;
        self.update(|st, current| {
            token = Some(st.scopes.open(ScopeKey::Fetcher(key.to_string())));
            // a reload that never landed is no longer ours to finish
            st.fetch_reload_ids.remove(key);
            let mut fetchers = current.fetchers.clone();
            let previous = fetchers.get(key).and_then(|f| f.data().cloned());
            set_fetcher(&mut fetchers, key, build(previous));
            SnapshotPatch::fetchers(fetchers)
        });
        token.unwrap_or_default()
    }

    async fn handle_action_fetch(&self, key: String, submission: Submission, target: Match) {
        let sub = submission.clone();
        let token = self.begin_fetch(&key, move |data| Fetcher::SubmittingAction {
            submission: sub,
            data,
        });

        debug!("fetcher calling action (key: {})", key);
        let result = tokio::select! {
            _ = token.cancelled() => {
                debug!("fetcher action aborted (key: {})", key);
                return;
            }
            result = call_action(&submission, &target, &token) => result,
        };

        let value = match result.outcome {
            Outcome::Redirect(redirect) => {
                let published = self.update_unless_cancelled(&token, |st, current| {
                    st.scopes.release(&ScopeKey::Fetcher(key.clone()));
                    st.fetch_redirect_ids.insert(key.clone());
                    let mut fetchers = current.fetchers.clone();
                    set_fetcher(
                        &mut fetchers,
                        &key,
                        Fetcher::LoadingActionRedirect {
                            submission: submission.clone(),
                        },
                    );
                    SnapshotPatch::fetchers(fetchers)
                });
                if published.is_some() {
                    self.redirect(
                        redirect.location,
                        RedirectState {
                            kind: RedirectKind::FetchAction,
                            set_cookie: redirect.set_cookie,
                        },
                    );
                }
                return;
            }
            Outcome::Error(err) => return self.bail_on_error(&token, &key, &target, err),
            Outcome::Catch(catch) => return self.bail_on_catch(&token, &key, &target, catch),
            Outcome::Value { value, .. } => value,
        };

        let reloading = Fetcher::ReloadingAction {
            submission: submission.clone(),
            data: value.clone(),
        };
        let mut load_id = 0;
        let published = self.update_unless_cancelled(&token, |st, current| {
            load_id = st.next_load_id();
            st.fetch_reload_ids.insert(key.clone(), load_id);
            let mut fetchers = current.fetchers.clone();
            set_fetcher(&mut fetchers, &key, reloading.clone());
            SnapshotPatch::fetchers(fetchers)
        });
        let Some(current) = published else {
            return;
        };

        // revalidate where the page is headed if a navigation is pending
        let location = current.transition.location().unwrap_or(&current.location).clone();
        let matches = current.next_matches.clone().unwrap_or_else(|| current.matches.clone());
        let to_load = {
            let mut revalidation = Revalidation::new(&current, &location, &matches);
            revalidation.submission = Some(&submission);
            revalidation.submission_route_id = Some(target.route_id());
            revalidation.fetcher = Some(&reloading);
            revalidation.matches_to_load()
        };

        debug!("fetcher calling loaders (key: {}, load id {})", key, load_id);
        let results = tokio::select! {
            _ = token.cancelled() => {
                debug!("fetcher loaders aborted (key: {})", key);
                return;
            }
            results = call_loaders(&to_load, &location, &token) => results,
        };

        if let Some(redirect) = find_redirect(&results) {
            let published = self.update_unless_cancelled(&token, |st, current| {
                st.fetch_reload_ids.remove(&key);
                st.scopes.release(&ScopeKey::Fetcher(key.clone()));
                let mut fetchers = current.fetchers.clone();
                set_fetcher(&mut fetchers, &key, Fetcher::Done { data: Some(value.clone()) });
                SnapshotPatch::fetchers(fetchers)
            });
            if published.is_some() {
                self.redirect(
                    redirect.location.clone(),
                    RedirectState {
                        kind: RedirectKind::Loader,
                        set_cookie: redirect.set_cookie,
                    },
                );
            }
            return;
        }

        self.update_unless_cancelled(&token, |st, current| {
            st.fetch_reload_ids.remove(&key);
            st.scopes.release(&ScopeKey::Fetcher(key.clone()));

            let error = find_error_and_boundary(&results, &current.matches, None);
            let catch = find_catch_and_boundary(&results, &current.matches, None);

            let mut fetchers = current.fetchers.clone();
            set_fetcher(&mut fetchers, &key, Fetcher::Done { data: Some(value) });

            let aborted = abort_stale_fetch_loads(st, &mut fetchers, load_id);
            if !aborted.is_empty() {
                debug!("marking aborted fetchers as done (keys: {:?})", aborted);
            }

            if yeet_stale_navigation_load(st, current, load_id) {
                // finish what the navigation would have done had it landed
                debug!("setting transition back to idle due to aborted navigation (key: {})", key);
                let location = current
                    .transition
                    .location()
                    .cloned()
                    .unwrap_or_else(|| current.location.clone());
                let matches = current
                    .next_matches
                    .clone()
                    .unwrap_or_else(|| current.matches.clone());
                let action_data = match current.transition {
                    Transition::LoadingActionReload { .. } => current.action_data.clone(),
                    _ => None,
                };
                return SnapshotPatch {
                    loader_data: Some(merge_loader_data(&current.loader_data, &results, &matches)),
                    location: Some(location),
                    matches: Some(matches),
                    next_matches: Some(None),
                    action_data: Some(action_data),
                    transition: Some(Transition::Idle),
                    fetchers: Some(fetchers),
                    ..Default::default()
                }
                .with_error(error)
                .with_catch(catch);
            }

            SnapshotPatch {
                loader_data: Some(merge_loader_data(
                    &current.loader_data,
                    &results,
                    &current.matches,
                )),
                fetchers: Some(fetchers),
                ..Default::default()
            }
            .with_error(error)
        });
    }

    /// GET submissions and plain loads: one loader call, no revalidation.
    async fn handle_loader_fetch(
        &self,
        key: String,
        url: Location,
        target: Match,
        submission: Option<Submission>,
    ) {
        let token = self.begin_fetch(&key, |data| match submission {
            Some(submission) => Fetcher::SubmittingLoader { submission, data },
            None => Fetcher::Loading { data },
        });

        let result = tokio::select! {
            _ = token.cancelled() => {
                debug!("fetcher loader aborted (key: {})", key);
                return;
            }
            result = call_loader(&target, &url, &token) => result,
        };

        match result.outcome {
            Outcome::Redirect(redirect) => {
                let published = self.update_unless_cancelled(&token, |st, current| {
                    st.scopes.release(&ScopeKey::Fetcher(key.clone()));
                    let mut fetchers = current.fetchers.clone();
                    let done = current.fetcher(&key).done();
                    set_fetcher(&mut fetchers, &key, done);
                    SnapshotPatch::fetchers(fetchers)
                });
                if published.is_some() {
                    self.redirect(
                        redirect.location,
                        RedirectState {
                            kind: RedirectKind::Loader,
                            set_cookie: redirect.set_cookie,
                        },
                    );
                }
            }
            Outcome::Error(err) => self.bail_on_error(&token, &key, &target, err),
            Outcome::Catch(catch) => self.bail_on_catch(&token, &key, &target, catch),
            Outcome::Value { value, .. } => {
                self.update_unless_cancelled(&token, |st, current| {
                    st.scopes.release(&ScopeKey::Fetcher(key.clone()));
                    let mut fetchers = current.fetchers.clone();
                    set_fetcher(&mut fetchers, &key, Fetcher::Done { data: Some(value) });
                    SnapshotPatch::fetchers(fetchers)
                });
            }
        }
    }

    /// An unexpected fetcher error drops the fetcher and surfaces the error
    /// at the nearest error boundary of its route.
    fn bail_on_error(&self, token: &CancellationToken, key: &str, target: &Match, err: RouteError) {
        debug!("fetcher errored (key: {}): {}", key, err);
        self.update_unless_cancelled(token, |st, current| {
            st.scopes.release(&ScopeKey::Fetcher(key.to_string()));
            let boundary = find_nearest_boundary(target, &current.matches, BoundaryKind::Error);
            let mut fetchers = current.fetchers.clone();
            fetchers.remove(key);
            SnapshotPatch::fetchers(fetchers).with_error(Some((err, boundary)))
        });
    }

    /// A fetcher catch drops the fetcher, settles the transition and shows
    /// the catch at the nearest catch boundary of its route.
    fn bail_on_catch(
        &self,
        token: &CancellationToken,
        key: &str,
        target: &Match,
        catch: CatchData,
    ) {
        debug!("fetcher caught {} (key: {})", catch.status, key);
        self.update_unless_cancelled(token, |st, current| {
            st.scopes.release(&ScopeKey::Fetcher(key.to_string()));
            let boundary = find_nearest_boundary(target, &current.matches, BoundaryKind::Catch);
            let mut fetchers = current.fetchers.clone();
            fetchers.remove(key);
            SnapshotPatch {
                transition: Some(Transition::Idle),
                fetchers: Some(fetchers),
                ..Default::default()
            }
            .with_catch(Some((catch, boundary)))
        });
    }
}

pub(super) fn set_fetcher(fetchers: &mut HashMap<String, Fetcher>, key: &str, fetcher: Fetcher) {
    debug!("fetcher set to {}/{} (key: {})", fetcher.phase(), fetcher.kind(), key);
    fetchers.insert(key.to_string(), fetcher);
}

fn mark_fetchers_done(fetchers: &mut HashMap<String, Fetcher>, keys: &[String]) {
    for key in keys {
        let done = fetchers.get(key).map(Fetcher::done).unwrap_or(Fetcher::Done { data: None });
        set_fetcher(fetchers, key, done);
    }
}

/// Cancels fetcher reloads that started before `landed_id` and are still
/// loading, marking them done with the data they already had. Returns the
/// affected keys.
pub(super) fn abort_stale_fetch_loads(
    st: &mut EngineState,
    fetchers: &mut HashMap<String, Fetcher>,
    landed_id: u64,
) -> Vec<String> {
    let stale: Vec<String> = st
        .fetch_reload_ids
        .iter()
        .filter(|(key, id)| {
            **id < landed_id
                && fetchers
                    .get(key.as_str())
                    .is_some_and(|f| f.phase() == Phase::Loading)
        })
        .map(|(key, _)| key.clone())
        .collect();

    for key in &stale {
        st.scopes.cancel(&ScopeKey::Fetcher(key.clone()));
        st.fetch_reload_ids.remove(key);
    }
    mark_fetchers_done(fetchers, &stale);
    stale
}

/// Fetchers whose action redirected are done once a navigation lands.
pub(super) fn mark_fetch_redirects_done(
    st: &mut EngineState,
    fetchers: &mut HashMap<String, Fetcher>,
) {
    let waiting: Vec<String> = st.fetch_redirect_ids.iter().cloned().collect();
    let mut done = Vec::new();
    for key in waiting {
        match fetchers.get(&key) {
            Some(Fetcher::LoadingActionRedirect { .. }) => {
                st.fetch_redirect_ids.remove(&key);
                done.push(key);
            }
            Some(_) => {}
            // deleted in the meantime
            None => {
                st.fetch_redirect_ids.remove(&key);
            }
        }
    }
    mark_fetchers_done(fetchers, &done);
}

/// A loading navigation whose load id is older than a fetcher reload that
/// just landed is cancelled; the fetcher's results settle it instead.
fn yeet_stale_navigation_load(st: &mut EngineState, current: &Snapshot, landed_id: u64) -> bool {
    let older = st.navigation_load_id.is_none_or(|id| id < landed_id);
    if current.transition.is_loading() && older {
        st.scopes.cancel(&ScopeKey::Navigation);
        st.navigation_load_id = None;
        return true;
    }
    false
}
