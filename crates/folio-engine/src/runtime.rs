//! The explicitly constructed runtime context.
//!
//! A [`Runtime`] owns the [`World`], the [`SystemRegistry`] (and through it
//! the [`TaskScheduler`]), and the [`EventBus`]. Nothing in the engine is a
//! process-wide singleton; hosts build a `Runtime` and hand it to an
//! [`EngineLoop`](crate::engine_loop::EngineLoop).

use folio_ecs::world::World;

use crate::events::EventBus;
use crate::scheduler::{ExecutionReport, Phase, TaskScheduler};
use crate::system::{InitReport, System, SystemConfig, SystemRegistry};
use crate::EngineError;

/// World, systems, scheduler and event bus in one place.
#[derive(Debug)]
pub struct Runtime {
    world: World,
    systems: SystemRegistry,
    events: EventBus,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(World::new())
    }
}

impl Runtime {
    /// A runtime with no event sink.
    pub fn new(world: World) -> Self {
        Self::with_events(world, EventBus::detached())
    }

    /// A runtime whose scheduler reports to `events`.
    pub fn with_events(world: World, events: EventBus) -> Self {
        Self {
            world,
            systems: SystemRegistry::with_scheduler(TaskScheduler::with_events(events.clone())),
            events,
        }
    }

    /// Replace the system registry, keeping this runtime's event bus.
    pub fn with_registry(mut self, mut systems: SystemRegistry) -> Self {
        systems.scheduler_mut().set_event_bus(self.events.clone());
        self.systems = systems;
        self
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn systems(&self) -> &SystemRegistry {
        &self.systems
    }

    pub fn systems_mut(&mut self) -> &mut SystemRegistry {
        &mut self.systems
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        self.systems.scheduler()
    }

    pub fn scheduler_mut(&mut self) -> &mut TaskScheduler {
        self.systems.scheduler_mut()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn register_system<S>(&mut self, system: S, config: SystemConfig) -> Result<(), EngineError>
    where
        S: System + 'static,
    {
        self.systems.register_system(system, config)
    }

    /// Initialize pending systems against this runtime's world.
    pub async fn initialize(&mut self) -> InitReport {
        self.systems.initialize_systems(&mut self.world).await
    }

    /// Run the fixed-phase tasks once. `dt` is in seconds.
    pub fn fixed_update(&mut self, dt: f64) -> ExecutionReport {
        self.systems
            .scheduler_mut()
            .execute_phase(Phase::Fixed, &mut self.world, dt)
    }

    /// Run the variable-phase tasks once. `dt` is in seconds.
    pub fn variable_update(&mut self, dt: f64) -> ExecutionReport {
        self.systems
            .scheduler_mut()
            .execute_phase(Phase::Variable, &mut self.world, dt)
    }

    /// Run every task once regardless of phase.
    pub fn update(&mut self, dt: f64) -> ExecutionReport {
        self.systems.scheduler_mut().execute(&mut self.world, dt)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
