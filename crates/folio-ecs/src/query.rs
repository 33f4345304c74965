//! Cached entity queries.
//!
//! A [`Query`] is bound to a fixed set of component type names. It remembers
//! the revision of every tracked [`ComponentStore`](crate::component::ComponentStore)
//! at its last refresh; any add, remove or destroy touching a tracked type
//! bumps that revision and marks the query dirty. A query over no types
//! matches every entity, so it tracks the world's entity revision instead.
//! The full entity scan only happens when a dirty query is refreshed.
//!
//! ```
//! use folio_ecs::prelude::*;
//! use serde_json::json;
//!
//! let mut world = World::new();
//! let e = world.create_entity();
//! world.add_component(e, "position", json!({"x": 0})).unwrap();
//!
//! let mut movers = Query::new(&["position"]);
//! assert_eq!(movers.refresh(&world), &[e]);
//! assert!(!movers.is_dirty(&world));
//!
//! world.remove_component(e, "position").unwrap();
//! assert!(movers.is_dirty(&world));
//! assert!(movers.refresh(&world).is_empty());
//! ```

use crate::entity::EntityId;
use crate::world::World;

/// A lazily refreshed `get_entities_with` result.
#[derive(Debug, Clone)]
pub struct Query {
    types: Vec<String>,
    /// Revision of each tracked type at the last rescan; `None` for a type
    /// the world did not know about yet.
    seen: Option<Vec<Option<u64>>>,
    results: Vec<EntityId>,
    rescans: u64,
}

impl Query {
    /// Create a query over `types`. Nothing is computed until the first
    /// [`refresh`](Self::refresh).
    pub fn new(types: &[&str]) -> Self {
        Self {
            types: types.iter().map(|t| (*t).to_owned()).collect(),
            seen: None,
            results: Vec::new(),
            rescans: 0,
        }
    }

    /// The component types this query requires.
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Whether a refresh against `world` would rescan.
    pub fn is_dirty(&self, world: &World) -> bool {
        match &self.seen {
            None => true,
            Some(seen) => *seen != self.current_revisions(world),
        }
    }

    /// Bring the cached result up to date with `world` and return it.
    pub fn refresh(&mut self, world: &World) -> &[EntityId] {
        let revisions = self.current_revisions(world);
        if self.seen.as_ref() != Some(&revisions) {
            let names: Vec<&str> = self.types.iter().map(String::as_str).collect();
            self.results = world.get_entities_with(&names);
            self.seen = Some(revisions);
            self.rescans += 1;
            tracing::trace!(types = ?self.types, matches = self.results.len(), "query rescanned");
        }
        &self.results
    }

    /// The result of the last refresh, possibly stale.
    pub fn cached(&self) -> &[EntityId] {
        &self.results
    }

    /// How many refreshes actually rescanned the world.
    pub fn rescan_count(&self) -> u64 {
        self.rescans
    }

    fn current_revisions(&self, world: &World) -> Vec<Option<u64>> {
        if self.types.is_empty() {
            return vec![Some(world.entity_revision())];
        }
        self.types
            .iter()
            .map(|name| world.component_revision(name))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn refresh_is_lazy() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component(e, "position", json!({})).unwrap();
        world.add_component(e, "velocity", json!({})).unwrap();

        let mut q = Query::new(&["position", "velocity"]);
        assert!(q.cached().is_empty());
        assert_eq!(q.refresh(&world), &[e]);
        assert_eq!(q.refresh(&world), &[e]);
        assert_eq!(q.rescan_count(), 1, "clean refresh must not rescan");
    }

    #[test]
    fn unrelated_changes_keep_query_clean() {
        let mut world = World::new();
        let e = world.create_entity();
        world.add_component(e, "position", json!({})).unwrap();

        let mut q = Query::new(&["position"]);
        q.refresh(&world);
        world.add_component(e, "appearance", json!({})).unwrap();
        let _ = world.create_entity();
        assert!(!q.is_dirty(&world));
    }

    #[test]
    fn tracked_add_marks_dirty() {
        let mut world = World::new();
        let mut q = Query::new(&["skill"]);
        assert!(q.refresh(&world).is_empty());

        let e = world.create_entity();
        world.add_component(e, "skill", json!({"name": "rust"})).unwrap();
        assert!(q.is_dirty(&world));
        assert_eq!(q.refresh(&world), &[e]);
        assert_eq!(q.rescan_count(), 2);
    }

    #[test]
    fn empty_query_follows_entity_set() {
        let mut world = World::new();
        let a = world.create_entity();
        let mut all = Query::new(&[]);
        assert_eq!(all.refresh(&world), &[a]);

        let b = world.create_entity();
        assert!(all.is_dirty(&world));
        assert_eq!(all.refresh(&world), world.get_entities_with(&[]).as_slice());
        assert_eq!(all.cached(), &[a, b]);

        // Component changes do not affect an entity-only query.
        world.add_component(b, "skill", json!({})).unwrap();
        assert!(!all.is_dirty(&world));

        assert!(world.destroy_entity(a));
        assert_eq!(all.refresh(&world), &[b]);
        assert_eq!(all.rescan_count(), 3);
    }

    #[test]
    fn destroy_marks_dirty() {
        let mut world = World::new();
        let a = world.create_entity();
        let b = world.create_entity();
        world.add_component(a, "skill", json!({})).unwrap();
        world.add_component(b, "skill", json!({})).unwrap();

        let mut q = Query::new(&["skill"]);
        assert_eq!(q.refresh(&world), &[a, b]);
        assert!(world.destroy_entity(a));
        assert!(q.is_dirty(&world));
        assert_eq!(q.refresh(&world), &[b]);
    }
}
