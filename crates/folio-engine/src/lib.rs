//! Folio Engine -- task scheduling, system initialization and the
//! fixed-timestep loop for the portfolio site runtime.
//!
//! This crate builds on [`folio_ecs`] to provide the driver: a
//! [`TaskScheduler`](scheduler::TaskScheduler) that orders tasks by group,
//! priority and dependency; a [`SystemRegistry`](system::SystemRegistry) that
//! initializes systems breadth-first along their dependency graph and
//! schedules them; and an [`EngineLoop`](engine_loop::EngineLoop) that splits
//! time into fixed logic steps and one render pass per frame.
//!
//! # Quick Start
//!
//! ```
//! use folio_engine::prelude::*;
//! use futures::executor::block_on;
//!
//! struct Greeter;
//!
//! impl System for Greeter {
//!     fn update(&mut self, world: &mut World, _dt: f64) -> anyhow::Result<()> {
//!         world.create_entity();
//!         Ok(())
//!     }
//! }
//!
//! let mut runtime = Runtime::default();
//! runtime.register_system(Greeter, SystemConfig::new("greeter")).unwrap();
//! assert!(block_on(runtime.initialize()).is_complete());
//!
//! let config = LoopConfig { fixed_time_step_ms: 10.0, ..Default::default() };
//! let mut engine = EngineLoop::new(runtime, config).unwrap();
//! engine.start(0.0);
//! engine.tick(30.0);
//! assert_eq!(engine.runtime().world().entity_count(), 3);
//! ```

#![deny(unsafe_code)]

pub mod engine_loop;
pub mod events;
pub mod runtime;
pub mod scheduler;
pub mod system;
pub mod task;

/// Re-export the ECS crate for convenience.
pub use folio_ecs;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A system's `init` returned an error or panicked.
    #[error("system '{system}' failed to initialize: {source}")]
    Initialization {
        system: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A task returned an error or panicked during execution.
    #[error("task '{task}' failed: {message}")]
    TaskExecution { task: String, message: String },

    /// A task with this name is already scheduled.
    #[error("a task named '{0}' already exists")]
    DuplicateTask(String),

    /// A system with this name is already registered.
    #[error("a system named '{0}' is already registered")]
    DuplicateSystem(String),

    /// Configuration failed to parse or validate.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use folio_ecs::prelude::*;

    pub use crate::engine_loop::{EngineLoop, FrameReport, LoopConfig, LoopDiagnostics};
    pub use crate::events::{EventBus, EventSink, RecordedEvent, RecordingSink};
    pub use crate::runtime::Runtime;
    pub use crate::scheduler::{
        ExecutionReport, Phase, ScheduleDiagnostics, TaskGroup, TaskScheduler,
    };
    pub use crate::system::{
        InitContext, InitReport, RegistryConfig, StallReason, StalledSystem, System, SystemConfig,
        SystemRegistry, SystemState,
    };
    pub use crate::task::{Task, TaskId, TaskRef, TaskRunner, TaskSpec, DEFAULT_GROUP};
    pub use crate::EngineError;
}
