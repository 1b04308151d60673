use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of an [`Action`] header, one entry per journal record family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CommandExecute,
    FileCreate,
    FileModify,
    FileDelete,
    PackageInstall,
    EnvironmentSetup,
    SessionCleanup,
    TaskStart,
    TaskComplete,
    TaskError,
    SystemConfig,
    LifecycleEvent,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommandExecute => "command_execute",
            Self::FileCreate => "file_create",
            Self::FileModify => "file_modify",
            Self::FileDelete => "file_delete",
            Self::PackageInstall => "package_install",
            Self::EnvironmentSetup => "environment_setup",
            Self::SessionCleanup => "session_cleanup",
            Self::TaskStart => "task_start",
            Self::TaskComplete => "task_complete",
            Self::TaskError => "task_error",
            Self::SystemConfig => "system_config",
            Self::LifecycleEvent => "lifecycle_event",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeKind {
    Create,
    Modify,
    Delete,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileChange {
    pub file_path: String,
    pub change_type: FileChangeKind,
    pub before: Option<String>,
    pub after: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandInfo {
    pub command: String,
    pub working_directory: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_s: f64,
    pub timestamp: DateTime<Utc>,
}

impl CommandInfo {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub message: String,
    pub stack_trace: Option<String>,
    pub context: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Kind-specific payload of an [`Action`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "payload_type", rename_all = "snake_case")]
pub enum ActionPayload {
    Command(CommandInfo),
    FileChange(FileChange),
    Error(ErrorInfo),
    None,
}

/// A single append-only journal record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: ActionKind,
    pub description: String,
    pub details: HashMap<String, String>,
    pub session_id: Option<String>,
    pub task_id: Option<String>,
    pub payload: ActionPayload,
}

impl Action {
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            timestamp: Utc::now(),
            kind,
            description: description.into(),
            details: HashMap::new(),
            session_id: None,
            task_id: None,
            payload: ActionPayload::None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_payload(mut self, payload: ActionPayload) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_info_success_is_exit_zero() {
        let cmd = CommandInfo {
            command: "echo hi".into(),
            working_directory: "/sandbox".into(),
            stdout: "hi\n".into(),
            stderr: String::new(),
            exit_code: 0,
            duration_s: 0.01,
            timestamp: Utc::now(),
        };
        assert!(cmd.succeeded());
    }

    #[test]
    fn action_ids_are_unique() {
        let a = Action::new(ActionKind::FileCreate, "create a.txt");
        let b = Action::new(ActionKind::FileCreate, "create b.txt");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn action_kind_display_matches_as_str() {
        assert_eq!(ActionKind::CommandExecute.to_string(), "command_execute");
        assert_eq!(ActionKind::TaskError.to_string(), "task_error");
    }
}
