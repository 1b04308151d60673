//! The sandbox facade: one entry point composing the security mediator,
//! isolate builder, action journal, cache fabric, resource governor,
//! history analyzer, and toolchain adapter into a single API.

pub mod error;
pub mod sandbox;

pub use error::SandboxError;
pub use sandbox::Sandbox;

pub use sbx_core::{
    Action, ActionKind, CommandInfo, IsolateStatus, IsolationConfig, ResourceLimits,
    SecurityPolicy, Session, VerifiedOutcome,
};
pub use sbx_cache::CacheHealth;
pub use sbx_config::SandboxConfig;
pub use sbx_history::{SessionExecutionHistory, TaskExecutionSummary};
pub use sbx_journal::Query;
pub use sbx_security::{FileOp, SecurityStatus};
pub use sbx_toolchain::{InvocationEvidence, InvocationOptions, Verb};
