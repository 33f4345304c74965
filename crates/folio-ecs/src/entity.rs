//! Entity identifiers and the entity store.
//!
//! An [`EntityId`] is a monotonically increasing 64-bit handle. Ids are never
//! recycled within a single [`EntityStore`], so a handle that outlives its
//! entity can never alias a newer one.
//!
//! The store also tracks, per entity, a [`ComponentMask`]: one bit per
//! component type index. Existence checks and query matching read the mask
//! instead of probing every component table.

use std::collections::BTreeMap;
use std::fmt;

use bit_vec::BitVec;
use serde::{Deserialize, Serialize};

use crate::component::ComponentTypeId;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// An opaque entity identifier.
///
/// Ordering follows creation order, which is what [`EntityStore`] iteration
/// and world queries rely on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Raw `u64` representation.
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    /// Reconstruct from a raw `u64`.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentMask
// ---------------------------------------------------------------------------

/// Bit set of the component types attached to one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentMask {
    bits: BitVec,
}

impl ComponentMask {
    /// An empty mask.
    pub fn new() -> Self {
        Self { bits: BitVec::new() }
    }

    /// Set the bit for `id`, growing the mask as needed.
    pub fn insert(&mut self, id: ComponentTypeId) {
        let idx = id.index();
        if idx >= self.bits.len() {
            self.bits.grow(idx + 1 - self.bits.len(), false);
        }
        self.bits.set(idx, true);
    }

    /// Clear the bit for `id`. Returns whether it was set.
    pub fn remove(&mut self, id: ComponentTypeId) -> bool {
        let was_set = self.contains(id);
        if was_set {
            self.bits.set(id.index(), false);
        }
        was_set
    }

    /// Whether the bit for `id` is set.
    pub fn contains(&self, id: ComponentTypeId) -> bool {
        self.bits.get(id.index()).unwrap_or(false)
    }

    /// Whether every id in `required` is set.
    pub fn contains_all(&self, required: &[ComponentTypeId]) -> bool {
        required.iter().all(|id| self.contains(*id))
    }

    /// Iterate the set component type ids in index order.
    pub fn iter(&self) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, set)| *set)
            .map(|(idx, _)| ComponentTypeId(idx as u32))
    }

    /// Number of set bits.
    pub fn len(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }

    /// Whether no bits are set.
    pub fn is_empty(&self) -> bool {
        self.bits.none()
    }
}

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Allocates [`EntityId`]s and tracks each live entity's [`ComponentMask`].
///
/// Live entities are kept in a `BTreeMap`; because ids only grow, map order
/// is creation order.
#[derive(Debug, Default)]
pub struct EntityStore {
    /// Next id to hand out.
    next_id: u64,
    /// Live entities and their component masks.
    masks: BTreeMap<EntityId, ComponentMask>,
}

impl EntityStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            masks: BTreeMap::new(),
        }
    }

    /// Allocate a fresh id and register it with an empty mask.
    pub fn create(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.masks.insert(id, ComponentMask::new());
        id
    }

    /// Forget an entity. Returns its final mask, or `None` if it was not
    /// alive.
    pub fn destroy(&mut self, id: EntityId) -> Option<ComponentMask> {
        self.masks.remove(&id)
    }

    /// Whether `id` is currently alive.
    pub fn contains(&self, id: EntityId) -> bool {
        self.masks.contains_key(&id)
    }

    /// The mask of a live entity.
    pub fn mask(&self, id: EntityId) -> Option<&ComponentMask> {
        self.masks.get(&id)
    }

    /// Mutable mask of a live entity.
    pub fn mask_mut(&mut self, id: EntityId) -> Option<&mut ComponentMask> {
        self.masks.get_mut(&id)
    }

    /// Live entities with their masks, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &ComponentMask)> + '_ {
        self.masks.iter().map(|(id, mask)| (*id, mask))
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    /// Whether there are no live entities.
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
