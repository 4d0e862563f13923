//! Structural diff between two translated configurations.
//!
//! Listeners are keyed by their bind address; a listener whose key is in
//! both configurations but whose scheme or TLS material differs is
//! "changed" and must be rebound. Routes are keyed by their match
//! predicate; a route with the same predicate but a different upstream or
//! middleware chain is "changed". Route changes never touch sockets.

use std::collections::HashMap;

use serde::Serialize;

use super::{Configuration, ListenerKey, ListenerSpec, RouteMatch};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub listeners_added: Vec<ListenerSpec>,
    pub listeners_removed: Vec<ListenerSpec>,
    /// `(old, new)` pairs sharing a bind address.
    pub listeners_changed: Vec<(ListenerSpec, ListenerSpec)>,
    pub listeners_unchanged: Vec<ListenerKey>,
    pub routes_added: usize,
    pub routes_removed: usize,
    pub routes_changed: usize,
    pub options_changed: bool,
}

/// Counts reported back to the caller of a reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub listeners_added: usize,
    pub listeners_removed: usize,
    pub listeners_changed: usize,
    pub routes_added: usize,
    pub routes_removed: usize,
    pub routes_changed: usize,
}

impl ConfigDiff {
    #[must_use]
    pub fn between(old: &Configuration, new: &Configuration) -> Self {
        let mut diff = Self::default();

        for spec in &new.listeners {
            match old.listener(&spec.key) {
                None => diff.listeners_added.push(spec.clone()),
                Some(prev) if prev == spec => diff.listeners_unchanged.push(spec.key),
                Some(prev) => diff.listeners_changed.push((prev.clone(), spec.clone())),
            }
        }
        diff.listeners_removed = old
            .listeners
            .iter()
            .filter(|spec| new.listener(&spec.key).is_none())
            .cloned()
            .collect();

        let old_routes: HashMap<&RouteMatch, _> =
            old.routes.iter().map(|r| (&r.matcher, r)).collect();
        let new_routes: HashMap<&RouteMatch, _> =
            new.routes.iter().map(|r| (&r.matcher, r)).collect();

        for (matcher, route) in &new_routes {
            match old_routes.get(matcher) {
                None => diff.routes_added += 1,
                Some(prev) if prev.upstream != route.upstream || prev.middleware != route.middleware => {
                    diff.routes_changed += 1;
                }
                Some(_) => {}
            }
        }
        diff.routes_removed = old_routes
            .keys()
            .filter(|m| !new_routes.contains_key(*m))
            .count();

        diff.options_changed = old.options != new.options;
        diff
    }

    /// True when the listener set must change.
    #[must_use]
    pub fn touches_listeners(&self) -> bool {
        !(self.listeners_added.is_empty()
            && self.listeners_removed.is_empty()
            && self.listeners_changed.is_empty())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.touches_listeners()
            && self.routes_added == 0
            && self.routes_removed == 0
            && self.routes_changed == 0
            && !self.options_changed
    }

    #[must_use]
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            listeners_added: self.listeners_added.len(),
            listeners_removed: self.listeners_removed.len(),
            listeners_changed: self.listeners_changed.len(),
            routes_added: self.routes_added,
            routes_removed: self.routes_removed,
            routes_changed: self.routes_changed,
        }
    }
}
