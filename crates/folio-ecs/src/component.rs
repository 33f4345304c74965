//! Component type registration and per-type storage.
//!
//! Component types are named by strings (`"position"`, `"appearance"`). The
//! first time a name is seen, the [`ComponentRegistry`] interns it into a
//! dense [`ComponentTypeId`] which doubles as the bit index in entity masks
//! and the slot of the type's [`ComponentStore`].

use std::collections::HashMap;
use std::fmt;

use crate::entity::EntityId;
use crate::schema::ComponentSchema;

/// A component instance: a plain JSON record.
pub type ComponentData = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// ComponentTypeId
// ---------------------------------------------------------------------------

/// Opaque, lightweight identifier for a registered component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(pub(crate) u32);

impl ComponentTypeId {
    /// Dense index of this type (bit position in entity masks).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentTypeId({})", self.0)
    }
}

// ---------------------------------------------------------------------------
// ComponentStore
// ---------------------------------------------------------------------------

/// Storage for every instance of one component type, keyed by entity.
///
/// If the type has a [`ComponentSchema`], all writes through the world are
/// validated against it before they reach the table.
#[derive(Debug)]
pub struct ComponentStore {
    name: String,
    schema: Option<ComponentSchema>,
    rows: HashMap<EntityId, ComponentData>,
    /// Bumped on every insert or removal; read by cached queries.
    revision: u64,
}

impl ComponentStore {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            schema: None,
            rows: HashMap::new(),
            revision: 0,
        }
    }

    /// The registered type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The schema validating this table, if any.
    pub fn schema(&self) -> Option<&ComponentSchema> {
        self.schema.as_ref()
    }

    /// Insert or replace the instance for `entity`. Returns the stored value.
    pub fn insert(&mut self, entity: EntityId, data: ComponentData) -> &ComponentData {
        self.revision += 1;
        match self.rows.entry(entity) {
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                slot.insert(data);
                slot.into_mut()
            }
            std::collections::hash_map::Entry::Vacant(slot) => slot.insert(data),
        }
    }

    /// Remove the instance for `entity`, returning it.
    pub fn remove(&mut self, entity: EntityId) -> Option<ComponentData> {
        let removed = self.rows.remove(&entity);
        if removed.is_some() {
            self.revision += 1;
        }
        removed
    }

    pub fn get(&self, entity: EntityId) -> Option<&ComponentData> {
        self.rows.get(&entity)
    }

    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut ComponentData> {
        self.rows.get_mut(&entity)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.rows.contains_key(&entity)
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Monotonic change counter for this table.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Maps component type names to [`ComponentTypeId`]s and owns the table of
/// tables.
///
/// Names are interned on first use, either by an explicit schema
/// registration or implicitly by the first `add_component` of an unseen
/// type (schema-less storage).
#[derive(Debug, Default)]
pub struct ComponentRegistry {
    /// Name -> ComponentTypeId.
    by_name: HashMap<String, ComponentTypeId>,
    /// Indexed by ComponentTypeId.0.
    stores: Vec<ComponentStore>,
}

impl ComponentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            by_name: HashMap::new(),
            stores: Vec::new(),
        }
    }

    /// Return the id for `name`, creating an empty schema-less table if the
    /// name has not been seen before.
    pub fn intern(&mut self, name: &str) -> ComponentTypeId {
        if let Some(&existing) = self.by_name.get(name) {
            return existing;
        }
        let id = ComponentTypeId(self.stores.len() as u32);
        self.stores.push(ComponentStore::new(name));
        self.by_name.insert(name.to_owned(), id);
        id
    }

    /// Intern `name` and return its id together with its table.
    pub fn entry(&mut self, name: &str) -> (ComponentTypeId, &mut ComponentStore) {
        let id = self.intern(name);
        (id, &mut self.stores[id.index()])
    }

    /// Attach a schema to a type, interning the name if needed.
    ///
    /// Schemas are immutable once attached: if the type already carries one,
    /// the call leaves it untouched and returns `false`.
    pub fn attach_schema(&mut self, schema: ComponentSchema) -> bool {
        let id = self.intern(schema.name());
        let store = &mut self.stores[id.index()];
        if store.schema.is_some() {
            return false;
        }
        store.schema = Some(schema);
        true
    }

    /// Look up a component type by its registered name.
    pub fn lookup(&self, name: &str) -> Option<ComponentTypeId> {
        self.by_name.get(name).copied()
    }

    /// Resolve every name in `names`; `None` if any of them is unknown.
    pub fn lookup_all(&self, names: &[&str]) -> Option<Vec<ComponentTypeId>> {
        names.iter().map(|name| self.lookup(name)).collect()
    }

    pub fn store(&self, id: ComponentTypeId) -> Option<&ComponentStore> {
        self.stores.get(id.index())
    }

    pub fn store_mut(&mut self, id: ComponentTypeId) -> Option<&mut ComponentStore> {
        self.stores.get_mut(id.index())
    }

    /// Table for a type name, if the name is known.
    pub fn store_by_name(&self, name: &str) -> Option<&ComponentStore> {
        self.lookup(name).and_then(|id| self.store(id))
    }

    /// Total number of known component types.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no component types are known yet.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Returns the names of all known component types, sorted.
    pub fn registered_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
