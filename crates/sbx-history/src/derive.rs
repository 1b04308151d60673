use sbx_core::{Action, ActionKind, ActionPayload, OutcomeStatus, VerifiedOutcome};

/// Derive the verified outcome intrinsic to an action, if any.
///
/// File, command, and error actions each carry an obvious pass/fail
/// judgement; other action kinds (task markers, lifecycle events,
/// package installs without a command payload) carry none and return
/// `None` here — callers may still attach outcomes to them via
/// [`attach_outcome`].
pub fn derive_outcome(action: &Action) -> Option<VerifiedOutcome> {
    match (&action.kind, &action.payload) {
        (ActionKind::FileCreate, ActionPayload::FileChange(fc)) => {
            let success = fc.after.as_deref().is_some_and(|s| !s.is_empty());
            Some(
                VerifiedOutcome::new(
                    action.id.clone(),
                    "file_created",
                    if success { OutcomeStatus::Success } else { OutcomeStatus::Failure },
                    format!("create {}", fc.file_path),
                )
                .with_evidence("path", fc.file_path.clone())
                .with_evidence("after_len", fc.after.as_deref().unwrap_or("").len().to_string()),
            )
        }
        (ActionKind::FileModify, ActionPayload::FileChange(fc)) => {
            let success = fc.after != fc.before;
            Some(
                VerifiedOutcome::new(
                    action.id.clone(),
                    "file_modified",
                    if success { OutcomeStatus::Success } else { OutcomeStatus::Failure },
                    format!("modify {}", fc.file_path),
                )
                .with_evidence("path", fc.file_path.clone())
                .with_evidence(
                    "before_len",
                    fc.before.as_deref().unwrap_or("").len().to_string(),
                )
                .with_evidence("after_len", fc.after.as_deref().unwrap_or("").len().to_string()),
            )
        }
        (ActionKind::FileDelete, ActionPayload::FileChange(fc)) => Some(
            VerifiedOutcome::new(
                action.id.clone(),
                "file_deleted",
                OutcomeStatus::Success,
                format!("delete {}", fc.file_path),
            )
            .with_evidence("path", fc.file_path.clone()),
        ),
        (ActionKind::CommandExecute, ActionPayload::Command(info)) => {
            let success = info.succeeded();
            Some(
                VerifiedOutcome::new(
                    action.id.clone(),
                    "command_executed",
                    if success { OutcomeStatus::Success } else { OutcomeStatus::Failure },
                    info.command.clone(),
                )
                .with_evidence("command", info.command.clone())
                .with_evidence("exit_code", info.exit_code.to_string())
                .with_evidence("duration_s", info.duration_s.to_string())
                .with_evidence("stdout_len", info.stdout.len().to_string())
                .with_evidence("stderr_len", info.stderr.len().to_string())
                .with_evidence("working_directory", info.working_directory.clone()),
            )
        }
        (ActionKind::TaskError, ActionPayload::Error(info)) => Some(
            VerifiedOutcome::new(
                action.id.clone(),
                "error",
                OutcomeStatus::Failure,
                info.message.clone(),
            )
            .with_evidence("error_type", info.error_type.clone())
            .with_evidence("has_stack_trace", info.stack_trace.is_some().to_string())
            .with_evidence("context_keys", info.context.keys().cloned().collect::<Vec<_>>().join(",")),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sbx_core::{CommandInfo, ErrorInfo, FileChange, FileChangeKind};
    use std::collections::HashMap;

    #[test]
    fn file_create_succeeds_when_after_nonempty() {
        let mut action = Action::new(ActionKind::FileCreate, "create a.txt");
        action.payload = ActionPayload::FileChange(FileChange {
            file_path: "a.txt".into(),
            change_type: FileChangeKind::Create,
            before: None,
            after: Some("hi".into()),
            timestamp: Utc::now(),
        });
        let outcome = derive_outcome(&action).unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn file_modify_fails_when_unchanged() {
        let mut action = Action::new(ActionKind::FileModify, "touch a.txt");
        action.payload = ActionPayload::FileChange(FileChange {
            file_path: "a.txt".into(),
            change_type: FileChangeKind::Modify,
            before: Some("same".into()),
            after: Some("same".into()),
            timestamp: Utc::now(),
        });
        let outcome = derive_outcome(&action).unwrap();
        assert!(!outcome.is_success());
    }

    #[test]
    fn command_failure_is_nonzero_exit() {
        let mut action = Action::new(ActionKind::CommandExecute, "run pytest");
        action.payload = ActionPayload::Command(CommandInfo {
            command: "pytest".into(),
            working_directory: "/sandbox".into(),
            stdout: String::new(),
            stderr: "boom".into(),
            exit_code: 1,
            duration_s: 0.2,
            timestamp: Utc::now(),
        });
        let outcome = derive_outcome(&action).unwrap();
        assert!(!outcome.is_success());
    }

    #[test]
    fn error_action_is_always_failure() {
        let mut action = Action::new(ActionKind::TaskError, "boom");
        action.payload = ActionPayload::Error(ErrorInfo {
            error_type: "ValueError".into(),
            message: "bad input".into(),
            stack_trace: None,
            context: HashMap::new(),
            timestamp: Utc::now(),
        });
        let outcome = derive_outcome(&action).unwrap();
        assert!(!outcome.is_success());
    }

    #[test]
    fn task_marker_actions_derive_nothing() {
        let action = Action::new(ActionKind::TaskStart, "start");
        assert!(derive_outcome(&action).is_none());
    }
}
