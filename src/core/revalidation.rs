//! # Revalidation
//!
//! Decides which matched routes re-run their loader for a navigation or a
//! fetcher reload. The short version:
//!
//! - routes below a failed submission (or below the catch boundary it
//!   resolved to) will not render, so they are never loaded;
//! - after a mutation, a reload of the same URL, a search change or a
//!   cookie being set, every loader runs unless its `should_reload` hook
//!   says otherwise;
//! - on a plain navigation only routes that are new or whose path changed
//!   run; the rest keep the data they already have.

use crate::core::fetcher::Fetcher;
use crate::core::location::Location;
use crate::core::route::{Match, ShouldReloadArgs};
use crate::core::state::Snapshot;
use crate::core::transition::Submission;

/// Everything the policy looks at for one decision.
pub struct Revalidation<'a> {
    /// What is on screen now.
    pub snapshot: &'a Snapshot,
    /// Where we are going.
    pub location: &'a Location,
    pub matches: &'a [Match],
    /// The action for this cycle errored or caught.
    pub action_failed: bool,
    pub submission: Option<&'a Submission>,
    /// Route whose action handled the submission.
    pub submission_route_id: Option<&'a str>,
    pub fetcher: Option<&'a Fetcher>,
    /// Catch boundary an action catch already resolved to.
    pub catch_boundary_id: Option<&'a str>,
}

impl<'a> Revalidation<'a> {
    pub fn new(snapshot: &'a Snapshot, location: &'a Location, matches: &'a [Match]) -> Self {
        Self {
            snapshot,
            location,
            matches,
            action_failed: false,
            submission: None,
            submission_route_id: None,
            fetcher: None,
            catch_boundary_id: None,
        }
    }

    /// Matches whose loader must run, in match order.
    pub fn matches_to_load(&self) -> Vec<Match> {
        let candidates = self.renderable_matches();

        // Collapsed to the root catch boundary: everything reloads.
        if self.snapshot.matches.len() == 1 {
            return candidates
                .iter()
                .filter(|m| m.route.loader.is_some())
                .cloned()
                .collect();
        }

        if self.is_revalidating() {
            return candidates
                .iter()
                .enumerate()
                .filter(|(index, m)| self.reload_by_route_props(m, *index))
                .map(|(_, m)| m.clone())
                .collect();
        }

        let last = candidates.len().saturating_sub(1);
        candidates
            .iter()
            .enumerate()
            .filter(|(index, m)| {
                // the submission's own failed route never reloads
                if self.action_failed && *index == last {
                    return false;
                }
                m.route.loader.is_some()
                    && (self.is_new(m, *index)
                        || self.path_changed(m, *index)
                        || self.location.set_cookie())
            })
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Drops the problematic route and everything below it.
    fn renderable_matches(&self) -> &'a [Match] {
        let submission_failed = self.submission_route_id.filter(|_| self.action_failed);
        if submission_failed.is_none() && self.catch_boundary_id.is_none() {
            return self.matches;
        }
        let cut = self.matches.iter().position(|m| {
            Some(m.route.id.as_str()) == submission_failed
                || Some(m.route.id.as_str()) == self.catch_boundary_id
        });
        match cut {
            Some(pos) => &self.matches[..pos],
            None => self.matches,
        }
    }

    fn is_revalidating(&self) -> bool {
        if matches!(self.fetcher, Some(Fetcher::ReloadingAction { .. })) {
            return true;
        }
        let current = &self.snapshot.location;
        self.snapshot.transition.follows_mutation()
            // same link clicked again, or a GET form resubmitted
            || self.location.href() == current.href()
            // search params feed every loader
            || self.location.query() != current.query()
            || self.location.set_cookie()
    }

    fn is_new(&self, m: &Match, index: usize) -> bool {
        match self.snapshot.matches.get(index) {
            Some(prev) => prev.route.id != m.route.id,
            None => true,
        }
    }

    fn path_changed(&self, m: &Match, index: usize) -> bool {
        let Some(prev) = self.snapshot.matches.get(index) else {
            return true;
        };
        // param change, /users/123 -> /users/456
        prev.pathname != m.pathname
            // splat changes are not visible in the pathname of the match
            || (prev.route.is_splat() && prev.params.get("*") != m.params.get("*"))
    }

    fn reload_by_route_props(&self, m: &Match, index: usize) -> bool {
        if m.route.loader.is_none() {
            return false;
        }
        if self.is_new(m, index) || self.path_changed(m, index) {
            return true;
        }
        match &m.route.should_reload {
            Some(hook) => hook.should_reload(ShouldReloadArgs {
                previous_url: &self.snapshot.location,
                url: self.location,
                submission: self.submission,
                params: &m.params,
            }),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::location::{RedirectKind, RedirectState};
    use crate::core::route::Route;
    use crate::core::transition::{FormMethod, Transition};
    use crate::test_support::{snapshot_at, ValueLoader};
    use serde_json::json;
    use std::sync::Arc;

    fn route(id: &str) -> Arc<Route> {
        Arc::new(Route::new(id).loader(ValueLoader::new(json!(id))))
    }

    fn ids(matches: &[Match]) -> Vec<&str> {
        matches.iter().map(Match::route_id).collect()
    }

    struct Tree {
        root: Arc<Route>,
        users: Arc<Route>,
        user: Arc<Route>,
        settings: Arc<Route>,
    }

    fn tree() -> Tree {
        Tree {
            root: route("root"),
            users: route("users"),
            user: route("user"),
            settings: route("settings"),
        }
    }

    fn user_chain(t: &Tree, id: &str) -> Vec<Match> {
        vec![
            Match::new(t.root.clone(), "/"),
            Match::new(t.users.clone(), "/users"),
            Match::new(t.user.clone(), format!("/users/{id}")).with_param("id", id),
        ]
    }

    #[test]
    fn test_sibling_navigation_keeps_unchanged_parents() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/users/1"), user_chain(&t, "1"));
        let next = vec![
            Match::new(t.root.clone(), "/"),
            Match::new(t.users.clone(), "/users"),
            Match::new(t.settings.clone(), "/users/settings"),
        ];
        let location = Location::new("/users/settings");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["settings"]);
    }

    #[test]
    fn test_param_change_reloads_only_changed_route() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/users/1"), user_chain(&t, "1"));
        let next = user_chain(&t, "2");
        let location = Location::new("/users/2");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["user"]);
    }

    #[test]
    fn test_search_change_reloads_everything() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/users/1"), user_chain(&t, "1"));
        let next = user_chain(&t, "1");
        let location = Location::from_href("/users/1?q=x");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["root", "users", "user"]);
    }

    #[test]
    fn test_same_href_reloads_everything() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/users/1"), user_chain(&t, "1"));
        let next = user_chain(&t, "1");
        let location = Location::new("/users/1");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["root", "users", "user"]);
    }

    #[test]
    fn test_should_reload_hook_consulted_on_revalidation() {
        let t = tree();
        let guarded = Arc::new(
            Route::new("users")
                .loader(ValueLoader::new(json!(null)))
                .should_reload(|args| args.submission.is_some()),
        );
        let chain = |users: &Arc<Route>| {
            vec![
                Match::new(t.root.clone(), "/"),
                Match::new(users.clone(), "/users"),
            ]
        };
        let mut snapshot = snapshot_at(Location::new("/users"), chain(&guarded));
        let next = chain(&guarded);

        let location = Location::new("/users");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["root"]);

        let submission = Submission::new(FormMethod::Post, "/users");
        snapshot.transition = Transition::LoadingActionReload {
            location: location.clone(),
            submission: submission.clone(),
        };
        let mut input = Revalidation::new(&snapshot, &location, &next);
        input.submission = Some(&submission);
        assert_eq!(ids(&input.matches_to_load()), vec!["root", "users"]);
    }

    #[test]
    fn test_failed_submission_route_and_below_are_skipped() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/users/1"), user_chain(&t, "1"));
        let next = user_chain(&t, "1");
        let location = Location::new("/users/1");
        let mut input = Revalidation::new(&snapshot, &location, &next);
        input.action_failed = true;
        input.submission_route_id = Some("users");
        assert_eq!(ids(&input.matches_to_load()), vec!["root"]);
    }

    #[test]
    fn test_catch_boundary_route_and_below_are_skipped() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/users/1"), user_chain(&t, "1"));
        let next = user_chain(&t, "1");
        let location = Location::new("/users/1");
        let mut input = Revalidation::new(&snapshot, &location, &next);
        input.catch_boundary_id = Some("user");
        assert_eq!(ids(&input.matches_to_load()), vec!["root", "users"]);
    }

    #[test]
    fn test_root_catch_state_reloads_all_loaders() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/missing"), vec![Match::new(t.root.clone(), "")]);
        let next = user_chain(&t, "1");
        let location = Location::new("/users/1");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["root", "users", "user"]);
    }

    #[test]
    fn test_set_cookie_reloads_unchanged_routes() {
        let t = tree();
        let snapshot = snapshot_at(Location::new("/users/1"), user_chain(&t, "1"));
        let next = user_chain(&t, "2");
        let location = Location::new("/users/2").with_state(RedirectState {
            kind: RedirectKind::Loader,
            set_cookie: true,
        });
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["root", "users", "user"]);
    }

    #[test]
    fn test_splat_param_change_counts_as_path_change() {
        let root = route("root");
        let files = Arc::new(
            Route::new("files")
                .path("files/*")
                .loader(ValueLoader::new(json!(1))),
        );
        let chain = |splat: &str| {
            vec![
                Match::new(root.clone(), "/"),
                // pathname of a splat match stops at the splat
                Match::new(files.clone(), "/files").with_param("*", splat),
            ]
        };
        let snapshot = snapshot_at(Location::new("/files/a.jpg"), chain("a.jpg"));
        let next = chain("b.xls");
        let location = Location::new("/files/b.xls");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["files"]);
    }

    #[test]
    fn test_routes_without_loaders_never_load() {
        let root = Arc::new(Route::new("root"));
        let leaf = route("leaf");
        let snapshot = snapshot_at(Location::new("/"), vec![Match::new(root.clone(), "/")]);
        let next = vec![Match::new(root, "/"), Match::new(leaf, "/leaf")];
        let location = Location::new("/leaf");
        let to_load = Revalidation::new(&snapshot, &location, &next).matches_to_load();
        assert_eq!(ids(&to_load), vec!["leaf"]);
    }
}
