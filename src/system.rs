//! System trait, access declarations and execution context.

use std::any::Any;
use std::time::Instant;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::archetype::Archetype;
use crate::command::CommandSender;
use crate::error::Result;
use crate::executor::SafeExecutor;
use crate::mask::ComponentMask;
use crate::world::World;

/// System ID, assigned densely at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemId(pub u32);

/// Fixed frame phases, executed in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    PreUpdate,
    EarlyUpdate,
    Update,
    LateUpdate,
    PostUpdate,
    PreRender,
    Render,
    PostRender,
    Cleanup,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::PreUpdate,
        Phase::EarlyUpdate,
        Phase::Update,
        Phase::LateUpdate,
        Phase::PostUpdate,
        Phase::PreRender,
        Phase::Render,
        Phase::PostRender,
        Phase::Cleanup,
    ];
}

/// How a system's work is spread over the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParallelStrategy {
    /// Sequential on the main thread
    #[default]
    None,
    /// Archetype passes fan out across the pool
    Archetypes,
    /// System runs as one pool task; its body parallelizes per entity
    Entities,
    /// Both of the above
    Full,
    /// System manages its own parallelism through `ctx.executor`
    Custom,
}

/// Component access mode for a declared component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

/// Run-every-N-frames gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInterval {
    pub every: u32,
    pub offset: u32,
}

impl TickInterval {
    pub fn should_run(&self, frame_number: u64) -> bool {
        self.every <= 1 || (frame_number + self.offset as u64) % self.every as u64 == 0
    }
}

/// Declared component access, used for conflict detection.
#[derive(Debug, Clone, Default)]
pub struct SystemAccess {
    pub reads: ComponentMask,
    pub writes: ComponentMask,
}

impl SystemAccess {
    pub fn empty() -> Self {
        Self::default()
    }

    fn declare(&mut self, type_id: u32, mode: AccessMode) {
        match mode {
            AccessMode::Read => self.reads.set(type_id as usize),
            AccessMode::Write => self.writes.set(type_id as usize),
            AccessMode::ReadWrite => {
                self.reads.set(type_id as usize);
                self.writes.set(type_id as usize);
            }
        }
    }

    /// Two systems may run concurrently iff neither writes what the other
    /// touches.
    pub fn conflicts_with(&self, other: &SystemAccess) -> bool {
        self.writes.intersects(&other.writes)
            || self.writes.intersects(&other.reads)
            || self.reads.intersects(&other.writes)
    }
}

/// Registration-time description of a system.
#[derive(Debug, Clone)]
pub struct SystemDescriptor {
    pub name: String,
    pub phase: Phase,
    /// Lower runs first; ties break by registration order
    pub priority: i32,
    pub required: ComponentMask,
    pub excluded: ComponentMask,
    pub optional: ComponentMask,
    pub access: SystemAccess,
    pub depends_on: Vec<String>,
    pub runs_before: Vec<String>,
    pub strategy: ParallelStrategy,
    pub tick: Option<TickInterval>,
}

impl SystemDescriptor {
    pub fn new(name: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            phase,
            priority: 0,
            required: ComponentMask::new(),
            excluded: ComponentMask::new(),
            optional: ComponentMask::new(),
            access: SystemAccess::empty(),
            depends_on: Vec::new(),
            runs_before: Vec::new(),
            strategy: ParallelStrategy::None,
            tick: None,
        }
    }

    /// Require a component, declaring how it is accessed.
    pub fn component(mut self, type_id: u32, mode: AccessMode) -> Self {
        self.required.set(type_id as usize);
        self.access.declare(type_id, mode);
        self
    }

    /// Match only archetypes without this component.
    pub fn exclude(mut self, type_id: u32) -> Self {
        self.excluded.set(type_id as usize);
        self
    }

    /// Optional component: does not affect matching, only accessors.
    pub fn optional(mut self, type_id: u32, mode: AccessMode) -> Self {
        self.optional.set(type_id as usize);
        self.access.declare(type_id, mode);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn runs_before(mut self, name: impl Into<String>) -> Self {
        self.runs_before.push(name.into());
        self
    }

    pub fn parallel(mut self, strategy: ParallelStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn tick_every(mut self, every: u32, offset: u32) -> Self {
        self.tick = Some(TickInterval { every, offset });
        self
    }
}

/// Lifecycle state of a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Created,
    Ready,
    Running,
    Paused,
    Error,
    Shutdown,
}

/// Per-frame execution state, tracked by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameState {
    NotStarted,
    Running,
    Completed,
    Skipped,
    Failed,
}

/// Per-frame scratch storage shared between systems, keyed by string.
#[derive(Default)]
pub struct FrameScratch {
    entries: Mutex<AHashMap<String, Box<dyn Any + Send>>>,
}

impl FrameScratch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send>(&self, key: impl Into<String>, value: T) {
        self.entries.lock().insert(key.into(), Box::new(value));
    }

    pub fn take<T: Any + Send>(&self, key: &str) -> Option<T> {
        let boxed = self.entries.lock().remove(key)?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(boxed) => {
                // Wrong type requested; put it back untouched.
                self.entries.lock().insert(key.to_string(), boxed);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Execution context handed to every system invocation.
pub struct SystemContext<'w> {
    pub world: &'w World,
    pub delta_seconds: f32,
    pub frame_number: u64,
    pub frame_start: Instant,
    pub executor: &'w SafeExecutor,
    pub commands: CommandSender,
    pub scratch: &'w FrameScratch,
}

/// Execution unit run by the scheduler.
///
/// `update` is called once per matching archetype. Under
/// `ParallelStrategy::Archetypes` those calls run concurrently on the worker
/// pool, so the hook takes `&self`; system-local mutable state belongs in
/// atomics or a mutex.
pub trait System: Send + Sync {
    fn update(&self, ctx: &SystemContext<'_>, archetype: &Archetype) -> Result<()>;
}

/// Boxed system
pub type BoxedSystem = Box<dyn System>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_rules() {
        let mut writer = SystemAccess::empty();
        writer.declare(0, AccessMode::Write);
        let mut reader = SystemAccess::empty();
        reader.declare(0, AccessMode::Read);
        let mut other = SystemAccess::empty();
        other.declare(1, AccessMode::Write);

        assert!(writer.conflicts_with(&reader));
        assert!(reader.conflicts_with(&writer));
        assert!(writer.conflicts_with(&writer.clone()));
        assert!(!reader.conflicts_with(&reader.clone()));
        assert!(!writer.conflicts_with(&other));
    }

    #[test]
    fn descriptor_builder_derives_access() {
        let descriptor = SystemDescriptor::new("movement", Phase::Update)
            .component(0, AccessMode::ReadWrite)
            .component(1, AccessMode::Read)
            .exclude(2)
            .optional(3, AccessMode::Write)
            .priority(5)
            .depends_on("input")
            .tick_every(2, 1);

        assert!(descriptor.required.contains(0));
        assert!(descriptor.required.contains(1));
        assert!(!descriptor.required.contains(3));
        assert!(descriptor.excluded.contains(2));
        assert!(descriptor.optional.contains(3));
        assert!(descriptor.access.writes.contains(0));
        assert!(descriptor.access.writes.contains(3));
        assert!(descriptor.access.reads.contains(1));
        assert_eq!(descriptor.priority, 5);
        assert_eq!(descriptor.depends_on, vec!["input".to_string()]);
    }

    #[test]
    fn tick_interval_gates_frames() {
        let every_third = TickInterval { every: 3, offset: 0 };
        assert!(every_third.should_run(0));
        assert!(!every_third.should_run(1));
        assert!(!every_third.should_run(2));
        assert!(every_third.should_run(3));

        let offset = TickInterval { every: 3, offset: 1 };
        assert!(!offset.should_run(0)); // (0 + 1) % 3 != 0
        assert!(offset.should_run(2));

        let every_frame = TickInterval { every: 1, offset: 0 };
        assert!(every_frame.should_run(7));
    }

    #[test]
    fn scratch_is_typed_per_key() {
        let scratch = FrameScratch::new();
        scratch.insert("hits", 3u32);
        assert!(scratch.contains("hits"));

        // Wrong type leaves the entry in place.
        assert_eq!(scratch.take::<String>("hits"), None);
        assert_eq!(scratch.take::<u32>("hits"), Some(3));
        assert!(!scratch.contains("hits"));
    }
}
