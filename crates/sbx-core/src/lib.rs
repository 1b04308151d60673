//! Shared data model for the sandbox core: the types every other
//! `sbx-*` crate builds against (policy, isolate, session, journal
//! records, verified outcomes, lifecycle events, resource samples).

pub mod action;
pub mod error;
pub mod isolate;
pub mod lifecycle_event;
pub mod outcome;
pub mod policy;
pub mod resource;
pub mod session;

pub use action::{Action, ActionKind, ActionPayload, CommandInfo, ErrorInfo, FileChange, FileChangeKind};
pub use error::CoreError;
pub use isolate::{Isolate, IsolateStatus, IsolationConfig};
pub use lifecycle_event::{LifecycleEventData, LifecycleEventHandler, LifecycleEventKind};
pub use outcome::{OutcomeStatus, VerificationMethod, VerifiedOutcome};
pub use policy::{SecurityPolicy, SecurityPolicyBuilder};
pub use resource::{ResourceLimits, ResourceUsage};
pub use session::Session;
