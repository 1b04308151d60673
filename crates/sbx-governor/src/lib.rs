//! Resource governor: host usage sampling, periodic reclamation, and the
//! resource-enforcement backend consumed by `sbx-security`'s mediator.

pub mod cgroup;
pub mod governor;
pub mod rlimit;
pub mod sandbox;

pub use cgroup::{
    CgroupScopeGuard, OrphanScope, SandboxConfig, cleanup_orphan_scopes, create_scope_command,
};
pub use governor::{CleanupTask, ResourceGovernor, ResourceStatistics, ShutdownSignal};
pub use rlimit::{RssWatcher, apply_rlimits};
pub use sandbox::{SandboxCapability, detect_sandbox_capability};
