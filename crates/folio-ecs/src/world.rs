//! The [`World`] is the top-level container for the ECS. It owns the entity
//! store, the component registry (one table per component type), and the
//! list of change observers.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::component::{ComponentData, ComponentRegistry, ComponentTypeId};
use crate::entity::{EntityId, EntityStore};
use crate::schema::ComponentSchema;
use crate::EcsError;

/// Field name used to store a non-object value in a schema-less table.
pub const SCALAR_FIELD: &str = "value";

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// What happened to a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentEventKind {
    /// Inserted or replaced.
    Added,
    /// Removed directly or by destroying its entity.
    Removed,
}

/// Notification passed to world observers after a component change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentEvent {
    pub kind: ComponentEventKind,
    pub entity: EntityId,
    pub component_type: String,
}

/// Handle returned by [`World::observe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverFn = Box<dyn Fn(&ComponentEvent) + Send + Sync>;

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level ECS container.
///
/// Provides the primary API for entity lifecycle and component access.
/// Mutating calls on an unknown entity fail with [`EcsError::NotFound`];
/// calls naming an unknown component type degrade to `None` / `false`.
#[derive(Default)]
pub struct World {
    /// Entity allocator and per-entity component masks.
    entities: EntityStore,
    /// Bumped on every create and destroy.
    entity_revision: u64,
    /// Component type names, schemas and tables.
    registry: ComponentRegistry,
    /// Change hooks, invoked in subscription order.
    observers: Vec<(ObserverId, ObserverFn)>,
    next_observer: u64,
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("entity_count", &self.entities.len())
            .field("component_types", &self.registry.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl World {
    /// Create a new, empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    // -- schemas ------------------------------------------------------------

    /// Register a schema for its component type.
    ///
    /// Returns `false` (and logs a warning) if the type already has a schema;
    /// the existing schema is kept.
    pub fn register_schema(&mut self, schema: ComponentSchema) -> bool {
        let name = schema.name().to_owned();
        let attached = self.registry.attach_schema(schema);
        if !attached {
            tracing::warn!(component = %name, "schema already registered; ignoring re-registration");
        }
        attached
    }

    /// The schema registered for `component_type`.
    pub fn schema(&self, component_type: &str) -> Option<&ComponentSchema> {
        self.registry
            .store_by_name(component_type)
            .and_then(|store| store.schema())
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Allocate a new entity with no components.
    pub fn create_entity(&mut self) -> EntityId {
        let entity = self.entities.create();
        self.entity_revision += 1;
        tracing::trace!(%entity, "entity created");
        entity
    }

    /// Destroy an entity and every component attached to it.
    ///
    /// Returns `false` if the entity does not exist.
    pub fn destroy_entity(&mut self, entity: EntityId) -> bool {
        let Some(mask) = self.entities.destroy(entity) else {
            return false;
        };
        self.entity_revision += 1;
        for type_id in mask.iter() {
            if let Some(store) = self.registry.store_mut(type_id) {
                if store.remove(entity).is_some() {
                    let event = ComponentEvent {
                        kind: ComponentEventKind::Removed,
                        entity,
                        component_type: store.name().to_owned(),
                    };
                    Self::notify(&self.observers, &event);
                }
            }
        }
        tracing::trace!(%entity, "entity destroyed");
        true
    }

    /// Whether `entity` exists.
    pub fn has_entity(&self, entity: EntityId) -> bool {
        self.entities.contains(entity)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Live entities in creation order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().map(|(id, _)| id)
    }

    // -- components ---------------------------------------------------------

    /// Attach (or replace) a component.
    ///
    /// If a schema is registered for `component_type` the data is defaulted
    /// and validated first; otherwise a schema-less table is created on
    /// demand and the data stored as-is. Non-object data in a schema-less
    /// table is wrapped as `{"value": data}`.
    pub fn add_component(
        &mut self,
        entity: EntityId,
        component_type: &str,
        data: Value,
    ) -> Result<&ComponentData, EcsError> {
        let Some(mask) = self.entities.mask_mut(entity) else {
            return Err(EcsError::NotFound { entity });
        };
        let (type_id, store) = self.registry.entry(component_type);
        let instance = match store.schema() {
            Some(schema) => schema.create_component_from_value(data)?,
            None => match data {
                Value::Object(map) => map,
                other => {
                    let mut map = ComponentData::new();
                    map.insert(SCALAR_FIELD.to_owned(), other);
                    map
                }
            },
        };

        mask.insert(type_id);
        let event = ComponentEvent {
            kind: ComponentEventKind::Added,
            entity,
            component_type: component_type.to_owned(),
        };
        let stored = store.insert(entity, instance);
        Self::notify(&self.observers, &event);
        Ok(stored)
    }

    /// Serialize `value` and attach it as a component.
    pub fn add_typed<T: Serialize>(
        &mut self,
        entity: EntityId,
        component_type: &str,
        value: &T,
    ) -> Result<&ComponentData, EcsError> {
        let data = serde_json::to_value(value).map_err(|e| EcsError::Serialization {
            component: component_type.to_owned(),
            details: e.to_string(),
        })?;
        self.add_component(entity, component_type, data)
    }

    /// Read a component. `None` if the entity, the type, or the component
    /// is missing.
    pub fn get_component(&self, entity: EntityId, component_type: &str) -> Option<&ComponentData> {
        self.registry
            .store_by_name(component_type)
            .and_then(|store| store.get(entity))
    }

    /// Mutable access to a component's fields.
    ///
    /// Edits made through this reference are not re-validated and do not
    /// notify observers: systems own the data they query.
    pub fn get_component_mut(
        &mut self,
        entity: EntityId,
        component_type: &str,
    ) -> Option<&mut ComponentData> {
        let type_id = self.registry.lookup(component_type)?;
        self.registry
            .store_mut(type_id)
            .and_then(|store| store.get_mut(entity))
    }

    /// Deserialize a component into `T`.
    ///
    /// A record holding only the scalar wrapper field falls back to
    /// deserializing the wrapped value.
    pub fn get_typed<T: DeserializeOwned>(
        &self,
        entity: EntityId,
        component_type: &str,
    ) -> Result<Option<T>, EcsError> {
        let Some(data) = self.get_component(entity, component_type) else {
            return Ok(None);
        };
        let whole = serde_json::from_value::<T>(Value::Object(data.clone()));
        let result = match (whole, data.get(SCALAR_FIELD)) {
            (Ok(value), _) => Ok(value),
            (Err(_), Some(inner)) if data.len() == 1 => serde_json::from_value::<T>(inner.clone()),
            (Err(e), _) => Err(e),
        };
        result.map(Some).map_err(|e| EcsError::Serialization {
            component: component_type.to_owned(),
            details: e.to_string(),
        })
    }

    /// Whether `entity` has a component of `component_type`.
    pub fn has_component(&self, entity: EntityId, component_type: &str) -> bool {
        match (self.entities.mask(entity), self.registry.lookup(component_type)) {
            (Some(mask), Some(type_id)) => mask.contains(type_id),
            _ => false,
        }
    }

    /// Detach a component.
    ///
    /// Returns `Ok(false)` if the entity has no such component (including
    /// an unknown type), and [`EcsError::NotFound`] for an unknown entity.
    pub fn remove_component(&mut self, entity: EntityId, component_type: &str) -> Result<bool, EcsError> {
        let Some(mask) = self.entities.mask_mut(entity) else {
            return Err(EcsError::NotFound { entity });
        };
        let Some(type_id) = self.registry.lookup(component_type) else {
            return Ok(false);
        };
        if !mask.remove(type_id) {
            return Ok(false);
        }
        if let Some(store) = self.registry.store_mut(type_id) {
            store.remove(entity);
        }
        let event = ComponentEvent {
            kind: ComponentEventKind::Removed,
            entity,
            component_type: component_type.to_owned(),
        };
        Self::notify(&self.observers, &event);
        Ok(true)
    }

    /// Names of the component types attached to `entity`, sorted.
    pub fn component_types_of(&self, entity: EntityId) -> Vec<&str> {
        let Some(mask) = self.entities.mask(entity) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = mask
            .iter()
            .filter_map(|id| self.registry.store(id).map(|store| store.name()))
            .collect();
        names.sort();
        names
    }

    // -- queries ------------------------------------------------------------

    /// Entities carrying every component type in `types`, in creation order.
    ///
    /// An unknown type matches nothing; an empty list matches every entity.
    pub fn get_entities_with(&self, types: &[&str]) -> Vec<EntityId> {
        let Some(required) = self.registry.lookup_all(types) else {
            return Vec::new();
        };
        self.matching(&required).collect()
    }

    fn matching<'a>(&'a self, required: &'a [ComponentTypeId]) -> impl Iterator<Item = EntityId> + 'a {
        self.entities
            .iter()
            .filter(move |(_, mask)| mask.contains_all(required))
            .map(|(id, _)| id)
    }

    /// Change counter for a component type's table; `None` for an unknown
    /// type. Used by [`Query`](crate::query::Query) to detect staleness.
    pub fn component_revision(&self, component_type: &str) -> Option<u64> {
        self.registry
            .store_by_name(component_type)
            .map(|store| store.revision())
    }

    /// Change counter for the entity set itself, bumped by
    /// [`create_entity`](Self::create_entity) and
    /// [`destroy_entity`](Self::destroy_entity).
    pub fn entity_revision(&self) -> u64 {
        self.entity_revision
    }

    // -- observers ----------------------------------------------------------

    /// Register a hook run after every component add or remove.
    pub fn observe<F>(&mut self, observer: F) -> ObserverId
    where
        F: Fn(&ComponentEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove a hook. Returns `false` if it was not registered.
    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    fn notify(observers: &[(ObserverId, ObserverFn)], event: &ComponentEvent) {
        for (_, observer) in observers {
            observer(event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
