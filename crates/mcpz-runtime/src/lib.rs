//! Run-plan resolution and instance lifecycle management for mcpz.
//!
//! [`resolve`] turns a [`RunRequest`] into a [`ResolvedRunPlan`];
//! [`InstanceManager`] launches the plan, supervises each process, and
//! persists every instance to an [`InstanceStore`] so later invocations can
//! stop or reclaim it.

/// Launch results and endpoint composition.
pub mod handle;
/// Persisted instance records and their state machine.
pub mod instance;
/// Launching, supervising and stopping instances.
pub mod manager;
/// Process spawning and liveness seams.
pub mod process;
/// Durable instance registries.
pub mod registry;
/// Turning a run request into a run plan.
pub mod resolver;

pub use handle::{LaunchFailure, RunHandle, RunningInstance};
pub use instance::{InstanceRecord, InstanceStatus};
pub use manager::{InstanceManager, ManagerOptions};
pub use process::{
    Handshake, Liveness, ProcessSpawner, ProcessTable, ServerProcess, StdioSpawner,
    SystemProcessTable,
};
pub use registry::{FileInstanceStore, InstanceStore, MemoryInstanceStore};
pub use resolver::{
    active_plugins, active_skills, resolve, Collision, ResolvedRunPlan, RunRequest, SkillTool,
};
