//! Folio ECS -- schema-validated Entity Component System for the portfolio
//! site runtime.
//!
//! Entities are opaque ids; components are plain JSON records stored in one
//! table per component type; each entity carries a bit mask of the types
//! attached to it so that `get_entities_with` queries never probe tables.
//! Component types may carry a [`ComponentSchema`](schema::ComponentSchema)
//! that applies defaults and validates field types on every write.
//!
//! # Quick Start
//!
//! ```
//! use folio_ecs::prelude::*;
//! use serde_json::json;
//!
//! let mut world = World::new();
//! world.register_schema(
//!     ComponentSchema::builder("position")
//!         .with_default("x", FieldType::Number, json!(0))
//!         .with_default("y", FieldType::Number, json!(0))
//!         .build(),
//! );
//!
//! let entity = world.create_entity();
//! world.add_component(entity, "position", json!({"x": 3})).unwrap();
//! world.add_component(entity, "appearance", json!({"color": "teal"})).unwrap();
//!
//! assert_eq!(world.get_component(entity, "position").unwrap()["y"], json!(0));
//! assert_eq!(world.get_entities_with(&["position", "appearance"]), vec![entity]);
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod query;
pub mod schema;
pub mod world;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Component data that does not satisfy its schema.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// A required field was absent after defaults were applied.
    #[error("component '{component}': missing required field '{field}'")]
    MissingField { component: String, field: String },

    /// A present field has the wrong runtime type.
    #[error("component '{component}': field '{field}' expected {expected}, got {actual}")]
    TypeMismatch {
        component: String,
        field: String,
        expected: String,
        actual: String,
    },

    /// Component data must be a JSON object when a schema applies.
    #[error("component '{component}': data must be an object, got {actual}")]
    NotAnObject { component: String, actual: String },

    /// A declarative schema could not be parsed.
    #[error("invalid schema for component '{component}': {details}")]
    InvalidSchema { component: String, details: String },
}

/// Errors produced by ECS operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (destroyed or never allocated).
    #[error("entity {entity} does not exist")]
    NotFound { entity: entity::EntityId },

    /// Component data was rejected by its schema.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Conversion between a typed value and component data failed.
    #[error("failed to convert component '{component}': {details}")]
    Serialization { component: String, details: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{ComponentData, ComponentRegistry, ComponentStore, ComponentTypeId};
    pub use crate::entity::{ComponentMask, EntityId, EntityStore};
    pub use crate::query::Query;
    pub use crate::schema::{ComponentSchema, FieldSpec, FieldType, TypeSpec};
    pub use crate::world::{ComponentEvent, ComponentEventKind, ObserverId, World};
    pub use crate::{EcsError, ValidationError};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
