//! Systems and their dependency-ordered initialization.
//!
//! A [`System`] is a unit of behaviour with an optional async `init` and a
//! per-frame `update`. Systems are registered with a [`SystemRegistry`]
//! together with a [`SystemConfig`] naming the systems they depend on.
//!
//! [`SystemRegistry::initialize_systems`] resolves those dependencies
//! breadth-first:
//!
//! 1. Every pending system without dependencies is initialized, all `init`
//!    futures in flight together.
//! 2. Passes then repeat: each system whose dependencies are all initialized
//!    is initialized in that pass. A pass that makes no progress, or hitting
//!    [`RegistryConfig::max_init_passes`], ends resolution and the leftovers
//!    are reported as [`StalledSystem`]s.
//! 3. Every successfully initialized system is wrapped in a task and handed
//!    to the registry's [`TaskScheduler`].
//!
//! A failing `init` (error or panic) marks only that system as failed.
//! Nothing is propagated to the caller; everything lands in the
//! [`InitReport`].

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use async_trait::async_trait;
use folio_ecs::world::World;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::scheduler::{panic_message, TaskScheduler};
use crate::task::{TaskId, TaskRunner, TaskSpec, DEFAULT_GROUP};
use crate::EngineError;

// ---------------------------------------------------------------------------
// System trait
// ---------------------------------------------------------------------------

/// A unit of behaviour driven by the engine.
///
/// Every method has a default, so a system implements only what it needs.
/// Systems run on a single thread and need not be `Send`.
#[async_trait(?Send)]
pub trait System {
    /// One-time asynchronous setup, run before the system is scheduled.
    async fn init(&mut self, _ctx: &InitContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once per scheduled pass with the elapsed time in seconds.
    fn update(&mut self, _world: &mut World, _dt: f64) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return to the freshly initialized state.
    fn reset(&mut self) {}

    /// Consulted when the system is scheduled; a system reporting `false`
    /// gets a disabled task.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// World access handed to [`System::init`].
///
/// Borrows are checked at runtime. Release them before any `.await`, since
/// other systems initialize in the same pass.
pub struct InitContext<'w> {
    world: RefCell<&'w mut World>,
}

impl<'w> InitContext<'w> {
    pub fn new(world: &'w mut World) -> Self {
        Self {
            world: RefCell::new(world),
        }
    }

    /// Shared access to the world.
    ///
    /// # Panics
    ///
    /// Panics if a [`world_mut`](Self::world_mut) borrow is outstanding.
    pub fn world(&self) -> Ref<'_, World> {
        Ref::map(self.world.borrow(), |w| &**w)
    }

    /// Exclusive access to the world.
    ///
    /// # Panics
    ///
    /// Panics if any other borrow is outstanding.
    pub fn world_mut(&self) -> RefMut<'_, World> {
        RefMut::map(self.world.borrow_mut(), |w| &mut **w)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Registration metadata for one system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    /// Free-form category label, e.g. `"resource"` or `"render"`.
    pub kind: String,
    /// Scheduler group the system's task joins.
    pub group: String,
    pub priority: i32,
    /// Names of systems that must initialize, and run, before this one.
    pub dependencies: Vec<String>,
    pub enabled: bool,
    pub tags: Vec<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "system".to_owned(),
            group: DEFAULT_GROUP.to_owned(),
            priority: 0,
            dependencies: Vec::new(),
            enabled: true,
            tags: Vec::new(),
        }
    }
}

impl SystemConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: &str) -> Self {
        self.kind = kind.to_owned();
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = group.to_owned();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, system: &str) -> Self {
        self.dependencies.push(system.to_owned());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_owned());
        self
    }
}

/// Tuning for [`SystemRegistry::initialize_systems`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ceiling on dependent-system passes after the root pass.
    pub max_init_passes: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_init_passes: 10 }
    }
}

impl RegistryConfig {
    /// Parse from JSON; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfig(format!("registry config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_init_passes == 0 {
            return Err(EngineError::InvalidConfig(
                "max_init_passes must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// States and reports
// ---------------------------------------------------------------------------

/// Lifecycle of a registered system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemState {
    /// Registered, `init` not yet run (or stalled on dependencies).
    Registered,
    /// `init` succeeded.
    Initialized,
    /// `init` failed with the given message. Never scheduled.
    Failed(String),
}

/// Why dependency resolution stopped with systems still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// No pending system had all its dependencies initialized.
    NoProgress,
    /// `max_init_passes` was reached while systems were still ready to run.
    PassLimit,
}

/// A system left uninitialized by [`SystemRegistry::initialize_systems`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledSystem {
    pub name: String,
    /// Dependencies that were not initialized (failed, stalled, or unknown).
    /// Empty when the system was ready but the pass limit came first.
    pub unmet: Vec<String>,
    pub reason: StallReason,
}

impl fmt::Display for StalledSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            StallReason::NoProgress => {
                write!(f, "{} waiting on [{}]", self.name, self.unmet.join(", "))
            }
            StallReason::PassLimit if self.unmet.is_empty() => {
                write!(f, "{} ready but not reached before the pass limit", self.name)
            }
            StallReason::PassLimit => write!(
                f,
                "{} waiting on [{}] when the pass limit was reached",
                self.name,
                self.unmet.join(", ")
            ),
        }
    }
}

/// Outcome of one [`SystemRegistry::initialize_systems`] call.
#[derive(Debug, Default)]
pub struct InitReport {
    /// Systems initialized by this call, in completion-pass order.
    pub initialized: Vec<String>,
    /// One [`EngineError::Initialization`] per failed system.
    pub failures: Vec<EngineError>,
    pub stalled: Vec<StalledSystem>,
    /// Systems handed to the scheduler by this call.
    pub scheduled: Vec<String>,
    /// Initialization passes run, the root pass included.
    pub passes: usize,
}

impl InitReport {
    /// `true` when nothing failed or stalled.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.stalled.is_empty()
    }
}

// ---------------------------------------------------------------------------
// SystemRegistry
// ---------------------------------------------------------------------------

type SharedSystem = Rc<RefCell<Box<dyn System>>>;

struct SystemEntry {
    config: SystemConfig,
    system: SharedSystem,
    state: SystemState,
    task: Option<TaskId>,
}

/// Task body that forwards to a registered system's `update`.
struct SystemTask {
    name: String,
    system: SharedSystem,
}

impl TaskRunner for SystemTask {
    fn run(&mut self, world: &mut World, dt: f64) -> anyhow::Result<()> {
        let mut system = self
            .system
            .try_borrow_mut()
            .map_err(|_| anyhow::anyhow!("system '{}' is already borrowed", self.name))?;
        system.update(world, dt)
    }
}

/// Owns systems, initializes them in dependency order, and schedules them.
pub struct SystemRegistry {
    config: RegistryConfig,
    /// Registration order.
    entries: Vec<SystemEntry>,
    scheduler: TaskScheduler,
}

impl Default for SystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::with_scheduler(TaskScheduler::new())
    }

    pub fn with_scheduler(scheduler: TaskScheduler) -> Self {
        Self {
            config: RegistryConfig::default(),
            entries: Vec::new(),
            scheduler,
        }
    }

    pub fn with_config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut TaskScheduler {
        &mut self.scheduler
    }

    // -- registration -------------------------------------------------------

    /// Register `system` under `config.name`. It is not initialized until the
    /// next [`initialize_systems`](Self::initialize_systems).
    pub fn register_system<S>(&mut self, system: S, config: SystemConfig) -> Result<(), EngineError>
    where
        S: System + 'static,
    {
        self.register_boxed(Box::new(system), config)
    }

    pub fn register_boxed(
        &mut self,
        system: Box<dyn System>,
        config: SystemConfig,
    ) -> Result<(), EngineError> {
        if config.name.is_empty() {
            return Err(EngineError::InvalidConfig(
                "system name must not be empty".to_owned(),
            ));
        }
        if self.index_of(&config.name).is_some() {
            return Err(EngineError::DuplicateSystem(config.name));
        }
        tracing::debug!(system = %config.name, kind = %config.kind, "registered system");
        self.entries.push(SystemEntry {
            config,
            system: Rc::new(RefCell::new(system)),
            state: SystemState::Registered,
            task: None,
        });
        Ok(())
    }

    /// Remove a system and its task. Returns `false` if unknown.
    pub fn remove_system(&mut self, name: &str) -> bool {
        let Some(idx) = self.index_of(name) else {
            return false;
        };
        let entry = self.entries.remove(idx);
        if let Some(task) = entry.task {
            self.scheduler.remove_task(task);
        }
        true
    }

    // -- initialization -----------------------------------------------------

    /// Initialize every system still in [`SystemState::Registered`], in
    /// dependency order, then schedule the ones that succeeded.
    pub async fn initialize_systems(&mut self, world: &mut World) -> InitReport {
        let mut report = InitReport::default();
        let ctx = InitContext::new(world);

        let roots: Vec<usize> = self
            .pending()
            .filter(|&i| self.entries[i].config.dependencies.is_empty())
            .collect();
        if !roots.is_empty() {
            self.init_pass(&roots, &ctx, &mut report).await;
        }

        let mut passes = 0;
        loop {
            let pending: Vec<usize> = self.pending().collect();
            if pending.is_empty() {
                break;
            }
            let ready: Vec<usize> = pending
                .iter()
                .copied()
                .filter(|&i| self.unmet_dependencies(i).is_empty())
                .collect();
            if ready.is_empty() || passes == self.config.max_init_passes {
                let reason = if ready.is_empty() {
                    StallReason::NoProgress
                } else {
                    tracing::warn!(
                        passes,
                        pending = pending.len(),
                        "system initialization reached the pass limit"
                    );
                    StallReason::PassLimit
                };
                report.stalled = pending
                    .iter()
                    .map(|&i| StalledSystem {
                        name: self.entries[i].config.name.clone(),
                        unmet: self.unmet_dependencies(i),
                        reason,
                    })
                    .collect();
                for stalled in &report.stalled {
                    tracing::warn!(
                        system = %stalled.name,
                        unmet = ?stalled.unmet,
                        reason = ?stalled.reason,
                        passes,
                        "system initialization stalled"
                    );
                }
                break;
            }
            passes += 1;
            self.init_pass(&ready, &ctx, &mut report).await;
        }
        drop(ctx);

        self.schedule_initialized(&mut report);
        tracing::debug!(
            initialized = report.initialized.len(),
            failed = report.failures.len(),
            stalled = report.stalled.len(),
            passes = report.passes,
            "system initialization finished"
        );
        report
    }

    /// Run `init` on every system in `batch` with all futures in flight.
    async fn init_pass(&mut self, batch: &[usize], ctx: &InitContext<'_>, report: &mut InitReport) {
        report.passes += 1;
        let handles: Vec<SharedSystem> = batch
            .iter()
            .map(|&i| Rc::clone(&self.entries[i].system))
            .collect();

        let outcomes = join_all(handles.iter().map(|handle| async move {
            let Ok(mut system) = handle.try_borrow_mut() else {
                return Err("system is already borrowed".to_owned());
            };
            match AssertUnwindSafe(system.init(ctx)).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(payload) => Err(panic_message(&*payload)),
            }
        }))
        .await;

        for (&idx, outcome) in batch.iter().zip(outcomes) {
            let entry = &mut self.entries[idx];
            match outcome {
                Ok(()) => {
                    entry.state = SystemState::Initialized;
                    report.initialized.push(entry.config.name.clone());
                }
                Err(message) => {
                    tracing::error!(system = %entry.config.name, error = %message, "system init failed");
                    entry.state = SystemState::Failed(message.clone());
                    report.failures.push(EngineError::Initialization {
                        system: entry.config.name.clone(),
                        source: message.into(),
                    });
                }
            }
        }
    }

    /// Wrap every initialized, unscheduled system as a task.
    fn schedule_initialized(&mut self, report: &mut InitReport) {
        for entry in &mut self.entries {
            if entry.state != SystemState::Initialized || entry.task.is_some() {
                continue;
            }
            let enabled = entry.config.enabled && entry.system.borrow().is_enabled();
            let runner = SystemTask {
                name: entry.config.name.clone(),
                system: Rc::clone(&entry.system),
            };
            let mut spec = TaskSpec::with_runner(&entry.config.name, runner)
                .group(&entry.config.group)
                .priority(entry.config.priority)
                .enabled(enabled);
            for dep in &entry.config.dependencies {
                spec = spec.depends_on(dep);
            }
            for tag in &entry.config.tags {
                spec = spec.tag(tag);
            }

            match self.scheduler.add_task(spec) {
                Ok(id) => {
                    entry.task = Some(id);
                    report.scheduled.push(entry.config.name.clone());
                }
                Err(err) => {
                    tracing::error!(system = %entry.config.name, error = %err, "could not schedule system");
                    report.failures.push(err);
                }
            }
        }
    }

    fn pending(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == SystemState::Registered)
            .map(|(i, _)| i)
    }

    fn unmet_dependencies(&self, idx: usize) -> Vec<String> {
        self.entries[idx]
            .config
            .dependencies
            .iter()
            .filter(|dep| !self.is_initialized(dep))
            .cloned()
            .collect()
    }

    // -- queries and control ------------------------------------------------

    fn index_of(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.config.name == name)
    }

    /// Borrow a registered system.
    ///
    /// Returns `None` if unknown, or if the system is mid-update.
    pub fn get_system(&self, name: &str) -> Option<Ref<'_, dyn System>> {
        let entry = &self.entries[self.index_of(name)?];
        let system = entry.system.try_borrow().ok()?;
        Some(Ref::map(system, |s| &**s))
    }

    /// Run `f` with exclusive access to a registered system.
    pub fn with_system_mut<R>(&self, name: &str, f: impl FnOnce(&mut dyn System) -> R) -> Option<R> {
        let entry = &self.entries[self.index_of(name)?];
        let mut system = entry.system.try_borrow_mut().ok()?;
        Some(f(&mut **system))
    }

    pub fn system_config(&self, name: &str) -> Option<&SystemConfig> {
        self.index_of(name).map(|i| &self.entries[i].config)
    }

    pub fn system_state(&self, name: &str) -> Option<&SystemState> {
        self.index_of(name).map(|i| &self.entries[i].state)
    }

    pub fn is_initialized(&self, name: &str) -> bool {
        self.system_state(name) == Some(&SystemState::Initialized)
    }

    /// The scheduler task backing a system, once scheduled.
    pub fn task_of(&self, name: &str) -> Option<TaskId> {
        self.index_of(name).and_then(|i| self.entries[i].task)
    }

    /// Names in registration order.
    pub fn system_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.config.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Enable or disable a system along with its task.
    pub fn set_system_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(idx) = self.index_of(name) else {
            return false;
        };
        let entry = &mut self.entries[idx];
        entry.config.enabled = enabled;
        if let Some(task) = entry.task {
            self.scheduler.set_task_enabled(task, enabled);
        }
        true
    }

    pub fn reset_system(&mut self, name: &str) -> bool {
        self.with_system_mut(name, |system| system.reset()).is_some()
    }

    pub fn reset_all(&mut self) {
        for entry in &self.entries {
            match entry.system.try_borrow_mut() {
                Ok(mut system) => system.reset(),
                Err(_) => {
                    tracing::warn!(system = %entry.config.name, "skipped reset of borrowed system")
                }
            }
        }
    }
}

impl fmt::Debug for SystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemRegistry")
            .field("config", &self.config)
            .field("systems", &self.system_names())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records `init:<name>` / `update:<name>` / `reset:<name>` into a log.
    struct Probe {
        name: &'static str,
        log: Log,
        fail_init: bool,
    }

    impl Probe {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Rc::clone(log),
                fail_init: false,
            }
        }

        fn failing(name: &'static str, log: &Log) -> Self {
            Self {
                fail_init: true,
                ..Self::new(name, log)
            }
        }
    }

    #[async_trait(?Send)]
    impl System for Probe {
        async fn init(&mut self, _ctx: &InitContext<'_>) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("init:{}", self.name));
            if self.fail_init {
                anyhow::bail!("{} could not load", self.name);
            }
            Ok(())
        }

        fn update(&mut self, _world: &mut World, _dt: f64) -> anyhow::Result<()> {
            self.log.borrow_mut().push(format!("update:{}", self.name));
            Ok(())
        }

        fn reset(&mut self) {
            self.log.borrow_mut().push(format!("reset:{}", self.name));
        }
    }

    struct Inert;

    impl System for Inert {}

    fn init_all(registry: &mut SystemRegistry, world: &mut World) -> InitReport {
        block_on(registry.initialize_systems(world))
    }

    #[test]
    fn defaults_are_noops() {
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Inert, SystemConfig::new("plain"))
            .unwrap();
        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.initialized, vec!["plain"]);
        assert!(report.is_complete());
        assert!(registry
            .scheduler_mut()
            .execute(&mut world, 0.016)
            .is_ok());
        assert!(registry.get_system("plain").unwrap().is_enabled());
    }

    #[test]
    fn dependents_initialize_after_their_dependencies() {
        let log: Log = Rc::default();
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Probe::new("render", &log), SystemConfig::new("render").depends_on("layout"))
            .unwrap();
        registry
            .register_system(Probe::new("layout", &log), SystemConfig::new("layout").depends_on("resource"))
            .unwrap();
        registry
            .register_system(Probe::new("resource", &log), SystemConfig::new("resource"))
            .unwrap();

        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.initialized, vec!["resource", "layout", "render"]);
        assert_eq!(report.passes, 3);
        assert_eq!(
            *log.borrow(),
            vec!["init:resource", "init:layout", "init:render"]
        );
        assert_eq!(
            registry.scheduler_mut().execution_order(),
            vec!["resource", "layout", "render"]
        );
    }

    #[test]
    fn failed_init_blocks_only_dependents() {
        let log: Log = Rc::default();
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Probe::failing("network", &log), SystemConfig::new("network"))
            .unwrap();
        registry
            .register_system(Probe::new("theme", &log), SystemConfig::new("theme"))
            .unwrap();
        registry
            .register_system(
                Probe::new("feed", &log),
                SystemConfig::new("feed").depends_on("network"),
            )
            .unwrap();

        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.initialized, vec!["theme"]);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].to_string().contains("network could not load"));
        assert_eq!(
            report.stalled,
            vec![StalledSystem {
                name: "feed".to_owned(),
                unmet: vec!["network".to_owned()],
                reason: StallReason::NoProgress,
            }]
        );
        assert!(matches!(
            registry.system_state("network"),
            Some(SystemState::Failed(_))
        ));
        assert_eq!(registry.system_state("feed"), Some(&SystemState::Registered));
        assert_eq!(report.scheduled, vec!["theme"]);
    }

    #[test]
    fn panicking_init_is_contained() {
        struct Explodes;

        #[async_trait(?Send)]
        impl System for Explodes {
            async fn init(&mut self, _ctx: &InitContext<'_>) -> anyhow::Result<()> {
                panic!("bad asset manifest")
            }
        }

        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Explodes, SystemConfig::new("assets"))
            .unwrap();
        registry
            .register_system(Inert, SystemConfig::new("nav"))
            .unwrap();

        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.initialized, vec!["nav"]);
        assert!(report.failures[0].to_string().contains("bad asset manifest"));
        assert!(registry.task_of("assets").is_none());
    }

    #[test]
    fn missing_dependency_stalls() {
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Inert, SystemConfig::new("orphan").depends_on("ghost"))
            .unwrap();
        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.stalled[0].unmet, vec!["ghost"]);
        assert_eq!(report.passes, 0);
        assert!(!report.is_complete());
    }

    #[test]
    fn dependency_cycle_stalls_without_hanging() {
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Inert, SystemConfig::new("a").depends_on("b"))
            .unwrap();
        registry
            .register_system(Inert, SystemConfig::new("b").depends_on("a"))
            .unwrap();
        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.stalled.len(), 2);
        assert!(report
            .stalled
            .iter()
            .all(|s| s.reason == StallReason::NoProgress));
        assert!(report.initialized.is_empty());
    }

    #[test]
    fn pass_ceiling_limits_long_chains() {
        let mut registry =
            SystemRegistry::new().with_config(RegistryConfig { max_init_passes: 2 });
        let mut world = World::new();
        registry
            .register_system(Inert, SystemConfig::new("s0"))
            .unwrap();
        for i in 1..5 {
            let name = format!("s{i}");
            let dep = format!("s{}", i - 1);
            registry
                .register_system(Inert, SystemConfig::new(&name).depends_on(&dep))
                .unwrap();
        }
        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.initialized, vec!["s0", "s1", "s2"]);
        assert_eq!(report.stalled.len(), 2);
        assert_eq!(report.stalled[0].name, "s3");
        assert!(report.stalled[0].unmet.is_empty());
        assert_eq!(report.stalled[0].reason, StallReason::PassLimit);
        assert_eq!(
            report.stalled[0].to_string(),
            "s3 ready but not reached before the pass limit"
        );
        assert_eq!(report.stalled[1].unmet, vec!["s3"]);

        // A second call picks up where the ceiling stopped.
        let report = init_all(&mut registry, &mut world);
        assert_eq!(report.initialized, vec!["s3", "s4"]);
    }

    #[test]
    fn second_call_initializes_only_new_systems() {
        let log: Log = Rc::default();
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Probe::new("a", &log), SystemConfig::new("a"))
            .unwrap();
        init_all(&mut registry, &mut world);
        registry
            .register_system(Probe::new("b", &log), SystemConfig::new("b").depends_on("a"))
            .unwrap();
        let report = init_all(&mut registry, &mut world);

        assert_eq!(report.initialized, vec!["b"]);
        assert_eq!(report.scheduled, vec!["b"]);
        assert_eq!(*log.borrow(), vec!["init:a", "init:b"]);
        assert_eq!(registry.scheduler().task_count(), 2);
    }

    #[test]
    fn init_context_gives_world_access() {
        struct Seeder;

        #[async_trait(?Send)]
        impl System for Seeder {
            async fn init(&mut self, ctx: &InitContext<'_>) -> anyhow::Result<()> {
                let entity = ctx.world_mut().create_entity();
                futures::future::ready(()).await;
                ctx.world_mut()
                    .add_component(entity, "page", json!({"slug": "about"}))?;
                anyhow::ensure!(ctx.world().entity_count() == 1, "expected one entity");
                Ok(())
            }
        }

        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Seeder, SystemConfig::new("seeder"))
            .unwrap();
        let report = init_all(&mut registry, &mut world);
        assert!(report.is_complete());
        assert_eq!(world.get_entities_with(&["page"]).len(), 1);
    }

    #[test]
    fn duplicate_and_empty_names_rejected() {
        let mut registry = SystemRegistry::new();
        registry
            .register_system(Inert, SystemConfig::new("a"))
            .unwrap();
        assert!(matches!(
            registry.register_system(Inert, SystemConfig::new("a")),
            Err(EngineError::DuplicateSystem(_))
        ));
        assert!(matches!(
            registry.register_system(Inert, SystemConfig::new("")),
            Err(EngineError::InvalidConfig(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn config_flows_into_task() {
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry.scheduler_mut().create_group("render", 10);
        registry
            .register_system(
                Inert,
                SystemConfig::new("cards")
                    .kind("render")
                    .group("render")
                    .priority(3)
                    .tag("projects")
                    .enabled(false),
            )
            .unwrap();
        init_all(&mut registry, &mut world);

        let task = registry.scheduler().task("cards").unwrap();
        assert_eq!(task.group(), "render");
        assert_eq!(task.priority(), 3);
        assert!(task.has_tag("projects"));
        assert!(!task.is_enabled());
        assert_eq!(registry.system_config("cards").unwrap().kind, "render");
    }

    #[test]
    fn disable_and_remove_follow_the_task() {
        let log: Log = Rc::default();
        let mut registry = SystemRegistry::new();
        let mut world = World::new();
        registry
            .register_system(Probe::new("a", &log), SystemConfig::new("a"))
            .unwrap();
        registry
            .register_system(Probe::new("b", &log), SystemConfig::new("b"))
            .unwrap();
        init_all(&mut registry, &mut world);
        log.borrow_mut().clear();

        assert!(registry.set_system_enabled("a", false));
        registry.scheduler_mut().execute(&mut world, 0.016);
        assert_eq!(*log.borrow(), vec!["update:b"]);

        assert!(registry.set_system_enabled("a", true));
        assert!(registry.remove_system("b"));
        assert!(!registry.remove_system("b"));
        log.borrow_mut().clear();
        registry.scheduler_mut().execute(&mut world, 0.016);
        assert_eq!(*log.borrow(), vec!["update:a"]);
        assert!(registry.scheduler().task("b").is_none());
        assert_eq!(registry.system_names(), vec!["a"]);
    }

    #[test]
    fn reset_one_or_all() {
        let log: Log = Rc::default();
        let mut registry = SystemRegistry::new();
        registry
            .register_system(Probe::new("a", &log), SystemConfig::new("a"))
            .unwrap();
        registry
            .register_system(Probe::new("b", &log), SystemConfig::new("b"))
            .unwrap();

        assert!(registry.reset_system("b"));
        assert!(!registry.reset_system("zzz"));
        registry.reset_all();
        assert_eq!(*log.borrow(), vec!["reset:b", "reset:a", "reset:b"]);
    }

    #[test]
    fn registry_config_from_json() {
        let config = RegistryConfig::from_json_str(r#"{"max_init_passes": 3}"#).unwrap();
        assert_eq!(config.max_init_passes, 3);
        assert_eq!(RegistryConfig::from_json_str("{}").unwrap(), RegistryConfig::default());
        assert!(RegistryConfig::from_json_str(r#"{"max_init_passes": 0}"#).is_err());
        assert!(RegistryConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn system_config_deserializes_with_defaults() {
        let config: SystemConfig =
            serde_json::from_str(r#"{"name": "nav", "dependencies": ["router"]}"#).unwrap();
        assert_eq!(config.group, DEFAULT_GROUP);
        assert!(config.enabled);
        assert_eq!(config.dependencies, vec!["router"]);
    }
}
