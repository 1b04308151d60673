use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    SessionStarted,
    WorkspaceCreated,
    WorkspaceActivated,
    WorkspaceSuspended,
    WorkspaceResumed,
    CleanupStarted,
    WorkspaceDestroyed,
    WorkspaceMerged,
    SessionEnded,
    ErrorOccurred,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LifecycleEventData {
    pub event_kind: LifecycleEventKind,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub details: HashMap<String, String>,
    pub error: Option<String>,
}

impl LifecycleEventData {
    pub fn new(event_kind: LifecycleEventKind, session_id: impl Into<String>) -> Self {
        Self {
            event_kind,
            session_id: session_id.into(),
            timestamp: Utc::now(),
            details: HashMap::new(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A handler invoked synchronously on the emitter's thread for each
/// lifecycle event. A panicking handler must not be allowed to abort the
/// lifecycle operation that triggered it; callers of `emit` are
/// responsible for catching unwinds at the dispatch site.
pub type LifecycleEventHandler = Box<dyn Fn(&LifecycleEventData) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_error_sets_error_field() {
        let event = LifecycleEventData::new(LifecycleEventKind::ErrorOccurred, "s1")
            .with_error("clone failed");
        assert_eq!(event.error.as_deref(), Some("clone failed"));
    }
}
