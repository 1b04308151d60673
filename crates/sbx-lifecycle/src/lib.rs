//! Lifecycle manager: owns the session table, creates and tears down
//! isolates through `sbx-isolate`, and dispatches lifecycle events to
//! registered handlers.

pub mod error;
pub mod table;

pub use error::LifecycleError;
pub use table::{LifecycleManager, WorkspaceStatus};
