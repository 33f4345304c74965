//! Group- and dependency-aware task scheduler.
//!
//! The [`TaskScheduler`] owns every [`Task`] and the [`TaskGroup`]s they
//! belong to. Each frame it runs the enabled tasks in a deterministic order:
//!
//! 1. Groups sorted by group priority (ties keep creation order).
//! 2. Within a group, enabled tasks sorted by task priority (stable, so
//!    registration order breaks ties).
//! 3. Each task is preceded by its dependencies, found by a depth-first walk.
//!    Cyclic edges and unresolved dependencies are logged, recorded in
//!    [`ScheduleDiagnostics`], and skipped.
//!
//! The order is cached and recomputed only after a change to the task or
//! group set. A failing task never stops the frame: its error (or panic) is
//! logged, emitted as `task:error`, and collected in the [`ExecutionReport`].
//!
//! # Example
//!
//! ```
//! use folio_engine::prelude::*;
//!
//! let mut world = World::new();
//! let mut scheduler = TaskScheduler::new();
//! scheduler
//!     .add_task(TaskSpec::new("render", |_, _| Ok(())).depends_on("layout"))
//!     .unwrap();
//! scheduler
//!     .add_task(TaskSpec::new("layout", |_, _| Ok(())))
//!     .unwrap();
//!
//! assert_eq!(scheduler.execution_order(), vec!["layout", "render"]);
//! let report = scheduler.execute(&mut world, 1.0 / 60.0);
//! assert!(report.is_ok());
//! ```

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use folio_ecs::world::World;
use serde_json::json;

use crate::events::{self, EventBus};
use crate::task::{Task, TaskId, TaskRef, TaskSpec};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Phase / TaskGroup
// ---------------------------------------------------------------------------

/// Which loop pass a group's tasks run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Fixed-step logic updates.
    #[default]
    Fixed,
    /// The once-per-frame render pass.
    Variable,
}

/// A named, prioritized bucket of tasks.
#[derive(Debug, Clone)]
pub struct TaskGroup {
    name: String,
    priority: i32,
    enabled: bool,
    phase: Phase,
    tasks: Vec<TaskId>,
}

impl TaskGroup {
    fn new(name: &str, priority: i32, phase: Phase) -> Self {
        Self {
            name: name.to_owned(),
            priority,
            enabled: true,
            phase,
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Member tasks in registration order.
    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }
}

// ---------------------------------------------------------------------------
// Diagnostics and reports
// ---------------------------------------------------------------------------

/// Dependency problems found while computing the execution order.
///
/// Each entry is `(task, dependency)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleDiagnostics {
    /// Edges dropped because they closed a cycle.
    pub cycles: Vec<(String, String)>,
    /// Dependencies that named no registered task.
    pub unresolved: Vec<(String, String)>,
    /// Dependencies not pulled in because they, or their group, are disabled.
    pub inactive: Vec<(String, String)>,
    /// Fixed-phase tasks depending on a variable-phase task. Under the engine
    /// loop the dependency runs after its dependent every frame.
    pub cross_phase: Vec<(String, String)>,
}

impl ScheduleDiagnostics {
    pub fn is_clean(&self) -> bool {
        self.cycles.is_empty() && self.unresolved.is_empty() && self.cross_phase.is_empty()
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Wall-clock time per task, in execution order. Failed tasks included.
    pub task_times: Vec<(String, Duration)>,
    /// One [`EngineError::TaskExecution`] per failed task.
    pub failures: Vec<EngineError>,
    pub total_time: Duration,
}

impl ExecutionReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the tasks that ran, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.task_times.iter().map(|(name, _)| name.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// TaskScheduler
// ---------------------------------------------------------------------------

/// Owns tasks and groups and runs them in dependency order.
#[derive(Debug, Default)]
pub struct TaskScheduler {
    tasks: HashMap<TaskId, Task>,
    by_name: HashMap<String, TaskId>,
    /// Creation order.
    groups: Vec<TaskGroup>,
    order: Vec<(TaskId, Phase)>,
    dirty: bool,
    diagnostics: ScheduleDiagnostics,
    next_id: u64,
    events: EventBus,
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: EventBus) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn set_event_bus(&mut self, events: EventBus) {
        self.events = events;
    }

    // -- groups -------------------------------------------------------------

    /// Create a fixed-phase group. Returns `false` if it already exists.
    pub fn create_group(&mut self, name: &str, priority: i32) -> bool {
        self.create_group_in_phase(name, priority, Phase::Fixed)
    }

    /// Create a group in the given phase. Returns `false` if it already
    /// exists; the existing group is left untouched.
    pub fn create_group_in_phase(&mut self, name: &str, priority: i32, phase: Phase) -> bool {
        if self.group_index(name).is_some() {
            return false;
        }
        self.groups.push(TaskGroup::new(name, priority, phase));
        self.dirty = true;
        true
    }

    pub fn group(&self, name: &str) -> Option<&TaskGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// All groups in creation order.
    pub fn groups(&self) -> &[TaskGroup] {
        &self.groups
    }

    /// Enable or disable every task in a group without removing them.
    ///
    /// Returns `false` if the group does not exist.
    pub fn set_group_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(idx) = self.group_index(name) else {
            return false;
        };
        if self.groups[idx].enabled != enabled {
            self.groups[idx].enabled = enabled;
            self.dirty = true;
            self.events.emit(
                events::TASK_GROUP_TOGGLE,
                json!({ "group": name, "enabled": enabled }),
            );
        }
        true
    }

    pub fn set_group_priority(&mut self, name: &str, priority: i32) -> bool {
        let Some(idx) = self.group_index(name) else {
            return false;
        };
        self.groups[idx].priority = priority;
        self.dirty = true;
        true
    }

    fn group_index(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.name == name)
    }

    /// Index of `name`, creating a default fixed-phase group if needed.
    fn ensure_group(&mut self, name: &str) -> usize {
        match self.group_index(name) {
            Some(idx) => idx,
            None => {
                self.groups.push(TaskGroup::new(name, 0, Phase::Fixed));
                self.groups.len() - 1
            }
        }
    }

    // -- tasks --------------------------------------------------------------

    /// Add a task. Its group is created on demand.
    ///
    /// Dependencies are resolved lazily, so a task may name one that is
    /// registered later.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId, EngineError> {
        if self.by_name.contains_key(&spec.name) {
            return Err(EngineError::DuplicateTask(spec.name));
        }
        self.next_id += 1;
        let id = TaskId(self.next_id);
        let group = self.ensure_group(&spec.group);
        self.groups[group].tasks.push(id);

        let task = Task::from_spec(id, spec);
        self.events.emit(
            events::TASK_ADDED,
            json!({ "id": id.0, "name": task.name, "group": task.group }),
        );
        self.by_name.insert(task.name.clone(), id);
        self.tasks.insert(id, task);
        self.dirty = true;
        Ok(id)
    }

    /// Remove a task from its group and from the id and name maps.
    ///
    /// Returns `false` if no such task exists.
    pub fn remove_task(&mut self, task: impl Into<TaskRef>) -> bool {
        let Some(id) = self.resolve(&task.into()) else {
            return false;
        };
        let Some(task) = self.tasks.remove(&id) else {
            return false;
        };
        self.by_name.remove(&task.name);
        if let Some(idx) = self.group_index(&task.group) {
            self.groups[idx].tasks.retain(|t| *t != id);
        }
        self.dirty = true;
        self.events.emit(
            events::TASK_REMOVED,
            json!({ "id": id.0, "name": task.name }),
        );
        true
    }

    pub fn set_task_enabled(&mut self, task: impl Into<TaskRef>, enabled: bool) -> bool {
        let Some(id) = self.resolve(&task.into()) else {
            return false;
        };
        match self.tasks.get_mut(&id) {
            Some(task) => {
                if task.enabled != enabled {
                    task.enabled = enabled;
                    self.dirty = true;
                }
                true
            }
            None => false,
        }
    }

    pub fn task(&self, task: impl Into<TaskRef>) -> Option<&Task> {
        self.resolve(&task.into()).and_then(|id| self.tasks.get(&id))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tasks carrying `tag`, in id order.
    pub fn tasks_with_tag(&self, tag: &str) -> Vec<&Task> {
        let mut tagged: Vec<&Task> = self.tasks.values().filter(|t| t.has_tag(tag)).collect();
        tagged.sort_by_key(|t| t.id);
        tagged
    }

    fn resolve(&self, task: &TaskRef) -> Option<TaskId> {
        match task {
            TaskRef::Id(id) => self.tasks.contains_key(id).then_some(*id),
            TaskRef::Name(name) => self.by_name.get(name).copied(),
        }
    }

    // -- ordering -----------------------------------------------------------

    /// Whether the cached order is stale.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Task names in the order the next `execute` will run them.
    pub fn execution_order(&mut self) -> Vec<String> {
        self.refresh_order();
        self.order
            .iter()
            .filter_map(|(id, _)| self.tasks.get(id))
            .map(|t| t.name.clone())
            .collect()
    }

    /// Problems found by the most recent order computation.
    pub fn diagnostics(&mut self) -> &ScheduleDiagnostics {
        self.refresh_order();
        &self.diagnostics
    }

    fn refresh_order(&mut self) {
        if !self.dirty {
            return;
        }
        let mut groups: Vec<&TaskGroup> = self.groups.iter().collect();
        groups.sort_by_key(|g| g.priority);

        let mut walk = OrderWalk::default();
        for group in groups.into_iter().filter(|g| g.enabled) {
            let mut members: Vec<&Task> = group
                .tasks
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .filter(|t| t.enabled)
                .collect();
            members.sort_by_key(|t| t.priority);
            for task in members {
                self.visit(task.id, &mut walk);
            }
        }

        tracing::debug!(
            tasks = walk.order.len(),
            cycles = walk.diagnostics.cycles.len(),
            unresolved = walk.diagnostics.unresolved.len(),
            "recomputed execution order"
        );
        self.order = walk.order;
        self.diagnostics = walk.diagnostics;
        self.dirty = false;
    }

    fn visit(&self, id: TaskId, walk: &mut OrderWalk) {
        if walk.added.contains(&id) {
            return;
        }
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        walk.visiting.insert(id);
        for dep in &task.dependencies {
            match self.resolve(dep) {
                None => {
                    tracing::warn!(task = %task.name, dependency = %dep, "unresolved task dependency");
                    walk.diagnostics
                        .unresolved
                        .push((task.name.clone(), dep.to_string()));
                }
                Some(dep_id) if walk.visiting.contains(&dep_id) => {
                    tracing::warn!(task = %task.name, dependency = %dep, "dependency cycle, edge skipped");
                    walk.diagnostics.cycles.push((task.name.clone(), dep.to_string()));
                }
                Some(dep_id) if !self.is_active(dep_id) => {
                    tracing::debug!(task = %task.name, dependency = %dep, "inactive dependency not scheduled");
                    walk.diagnostics
                        .inactive
                        .push((task.name.clone(), dep.to_string()));
                }
                Some(dep_id) => {
                    if self.runs_later(task, dep_id) {
                        tracing::warn!(
                            task = %task.name,
                            dependency = %dep,
                            "fixed-phase task depends on a variable-phase task"
                        );
                        walk.diagnostics
                            .cross_phase
                            .push((task.name.clone(), dep.to_string()));
                    }
                    self.visit(dep_id, walk)
                }
            }
        }
        walk.visiting.remove(&id);
        walk.added.insert(id);
        walk.order.push((id, self.phase_of(task)));
    }

    fn is_active(&self, id: TaskId) -> bool {
        self.tasks.get(&id).is_some_and(|task| {
            task.enabled && self.group(&task.group).is_some_and(|g| g.enabled)
        })
    }

    /// The engine loop runs every fixed update before the variable pass.
    fn runs_later(&self, task: &Task, dep: TaskId) -> bool {
        self.phase_of(task) == Phase::Fixed
            && self.tasks.get(&dep).is_some_and(|d| self.phase_of(d) == Phase::Variable)
    }

    fn phase_of(&self, task: &Task) -> Phase {
        self.group(&task.group).map(|g| g.phase).unwrap_or_default()
    }

    // -- execution ----------------------------------------------------------

    /// Run every scheduled task once, across both phases.
    pub fn execute(&mut self, world: &mut World, dt: f64) -> ExecutionReport {
        self.run(None, world, dt)
    }

    /// Run only the tasks whose group is in `phase`.
    pub fn execute_phase(&mut self, phase: Phase, world: &mut World, dt: f64) -> ExecutionReport {
        self.run(Some(phase), world, dt)
    }

    fn run(&mut self, phase: Option<Phase>, world: &mut World, dt: f64) -> ExecutionReport {
        self.refresh_order();
        let start = Instant::now();
        let mut report = ExecutionReport::default();

        for (id, task_phase) in &self.order {
            if phase.is_some_and(|p| p != *task_phase) {
                continue;
            }
            let Some(task) = self.tasks.get_mut(id) else {
                continue;
            };
            let task_start = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.runner.run(world, dt)));
            report
                .task_times
                .push((task.name.clone(), task_start.elapsed()));

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(payload) => panic_message(&*payload),
            };
            tracing::error!(task = %task.name, error = %message, "task failed");
            self.events.emit(
                events::TASK_ERROR,
                json!({ "task": task.name, "error": message }),
            );
            report.failures.push(EngineError::TaskExecution {
                task: task.name.clone(),
                message,
            });
        }

        report.total_time = start.elapsed();
        report
    }
}

#[derive(Default)]
struct OrderWalk {
    order: Vec<(TaskId, Phase)>,
    added: HashSet<TaskId>,
    visiting: HashSet<TaskId>,
    diagnostics: ScheduleDiagnostics,
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_owned()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
