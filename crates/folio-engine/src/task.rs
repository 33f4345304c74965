//! Scheduler tasks.
//!
//! A [`Task`] wraps something runnable (a closure or a registered system)
//! with the metadata the [`TaskScheduler`](crate::scheduler::TaskScheduler)
//! orders by: owning group, priority, dependencies, tags, and an enabled
//! flag. Tasks are described with a [`TaskSpec`] builder and handed to
//! [`TaskScheduler::add_task`](crate::scheduler::TaskScheduler::add_task).

use std::collections::BTreeSet;
use std::fmt;

use folio_ecs::world::World;

/// Group a task lands in when its spec names none.
pub const DEFAULT_GROUP: &str = "default";

// ---------------------------------------------------------------------------
// TaskId / TaskRef
// ---------------------------------------------------------------------------

/// Identifier assigned by the scheduler when a task is added.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Reference to a task by id or by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskRef {
    Id(TaskId),
    Name(String),
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<TaskId> for TaskRef {
    fn from(id: TaskId) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for TaskRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for TaskRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&String> for TaskRef {
    fn from(name: &String) -> Self {
        Self::Name(name.clone())
    }
}

// ---------------------------------------------------------------------------
// TaskRunner
// ---------------------------------------------------------------------------

/// The body of a task.
///
/// Implemented for any `FnMut(&mut World, f64) -> anyhow::Result<()>`, so
/// plain closures can be scheduled directly.
pub trait TaskRunner {
    fn run(&mut self, world: &mut World, dt: f64) -> anyhow::Result<()>;
}

impl<F> TaskRunner for F
where
    F: FnMut(&mut World, f64) -> anyhow::Result<()>,
{
    fn run(&mut self, world: &mut World, dt: f64) -> anyhow::Result<()> {
        self(world, dt)
    }
}

// ---------------------------------------------------------------------------
// TaskSpec
// ---------------------------------------------------------------------------

/// Builder describing a task to add to the scheduler.
pub struct TaskSpec {
    pub(crate) name: String,
    pub(crate) group: String,
    pub(crate) priority: i32,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) dependencies: Vec<TaskRef>,
    pub(crate) enabled: bool,
    pub(crate) runner: Box<dyn TaskRunner>,
}

impl TaskSpec {
    /// A closure task in the default group with priority 0, enabled.
    pub fn new<F>(name: &str, body: F) -> Self
    where
        F: FnMut(&mut World, f64) -> anyhow::Result<()> + 'static,
    {
        Self::boxed(name, Box::new(body))
    }

    /// A task driven by a custom [`TaskRunner`].
    pub fn with_runner(name: &str, runner: impl TaskRunner + 'static) -> Self {
        Self::boxed(name, Box::new(runner))
    }

    pub fn boxed(name: &str, runner: Box<dyn TaskRunner>) -> Self {
        Self {
            name: name.to_owned(),
            group: DEFAULT_GROUP.to_owned(),
            priority: 0,
            tags: BTreeSet::new(),
            dependencies: Vec::new(),
            enabled: true,
            runner,
        }
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = group.to_owned();
        self
    }

    /// Lower runs first within the group.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_owned());
        self
    }

    /// Require `dependency` to run before this task.
    pub fn depends_on(mut self, dependency: impl Into<TaskRef>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task owned by the scheduler.
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) group: String,
    pub(crate) priority: i32,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) dependencies: Vec<TaskRef>,
    pub(crate) enabled: bool,
    pub(crate) runner: Box<dyn TaskRunner>,
}

impl Task {
    pub(crate) fn from_spec(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            name: spec.name,
            group: spec.group,
            priority: spec.priority,
            tags: spec.tags,
            dependencies: spec.dependencies,
            enabled: spec.enabled,
            runner: spec.runner,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn dependencies(&self) -> &[TaskRef] {
        &self.dependencies
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group", &self.group)
            .field("priority", &self.priority)
            .field("tags", &self.tags)
            .field("dependencies", &self.dependencies)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_defaults() {
        let spec = TaskSpec::new("layout", |_, _| Ok(()));
        assert_eq!(spec.group, DEFAULT_GROUP);
        assert_eq!(spec.priority, 0);
        assert!(spec.enabled);
        assert!(spec.dependencies.is_empty());
    }

    #[test]
    fn spec_builder_collects_metadata() {
        let spec = TaskSpec::new("render", |_, _| Ok(()))
            .group("render")
            .priority(-5)
            .tag("dom")
            .tag("dom")
            .depends_on("layout")
            .depends_on(TaskId(7))
            .enabled(false);
        let task = Task::from_spec(TaskId(1), spec);
        assert_eq!(task.group(), "render");
        assert_eq!(task.priority(), -5);
        assert_eq!(task.tags().len(), 1);
        assert!(task.has_tag("dom"));
        assert_eq!(
            task.dependencies(),
            &[TaskRef::Name("layout".to_owned()), TaskRef::Id(TaskId(7))]
        );
        assert!(!task.is_enabled());
    }

    #[test]
    fn closures_run_against_world() {
        let mut world = World::new();
        let mut runner = |world: &mut World, _dt: f64| -> anyhow::Result<()> {
            world.create_entity();
            Ok(())
        };
        TaskRunner::run(&mut runner, &mut world, 0.016).unwrap();
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn task_ref_display() {
        assert_eq!(TaskRef::from("nav").to_string(), "nav");
        assert_eq!(TaskRef::from(TaskId(3)).to_string(), "task#3");
    }
}
