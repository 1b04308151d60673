use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sbx_core::{ActionKind, ActionPayload, OutcomeStatus, VerifiedOutcome};
use sbx_journal::{Journal, Query};
use serde::{Deserialize, Serialize};

use crate::derive::derive_outcome;
use crate::error::HistoryError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Error,
    InProgress,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskExecutionSummary {
    pub task_id: String,
    pub task_description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_s: f64,
    pub status: TaskStatus,
    pub actions_count: u64,
    pub files_modified: u64,
    pub commands_executed: u64,
    pub errors_encountered: u64,
    pub verified_outcomes: Vec<VerifiedOutcome>,
    pub success_rate: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionExecutionHistory {
    pub session_id: String,
    pub tasks: Vec<TaskExecutionSummary>,
    pub overall_success_rate: f64,
    pub key_achievements: Vec<String>,
    pub remaining_issues: Vec<String>,
    pub recommendations: Vec<String>,
}

fn success_rate(outcomes: &[VerifiedOutcome]) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let successes = outcomes.iter().filter(|o| o.status == OutcomeStatus::Success).count();
    successes as f64 / outcomes.len() as f64
}

/// Pure reader over the action journal. Derives verified outcomes and
/// rolls them up into task- and session-level summaries; never writes
/// to the journal itself.
pub struct HistoryAnalyzer<'a> {
    journal: &'a Journal,
    extra_outcomes: Mutex<HashMap<String, Vec<VerifiedOutcome>>>,
}

impl<'a> HistoryAnalyzer<'a> {
    pub fn new(journal: &'a Journal) -> Self {
        Self { journal, extra_outcomes: Mutex::new(HashMap::new()) }
    }

    /// Attach a caller-supplied outcome to an action, in addition to
    /// whatever outcome is intrinsically derived from its payload.
    pub fn add_verified_outcome(&self, action_id: &str, outcome: VerifiedOutcome) {
        self.extra_outcomes.lock().unwrap().entry(action_id.to_string()).or_default().push(outcome);
    }

    pub fn analyze_task_execution(
        &self,
        task_id: &str,
        session_id: Option<&str>,
    ) -> Result<TaskExecutionSummary, HistoryError> {
        let query = Query {
            session_id: session_id.map(str::to_string),
            task_id: Some(task_id.to_string()),
            ..Default::default()
        };
        let actions = self.journal.get_actions(&query)?;
        if actions.is_empty() {
            tracing::warn!(task_id, "no journal actions found for task");
            return Err(HistoryError::TaskNotFound(task_id.to_string()));
        }

        let task_description = actions
            .iter()
            .find(|a| matches!(a.kind, ActionKind::TaskStart))
            .map(|a| a.description.clone())
            .unwrap_or_else(|| actions[0].description.clone());

        let start_time = actions.iter().map(|a| a.timestamp).min().unwrap();
        let end_time = actions.iter().map(|a| a.timestamp).max().unwrap();

        let mut files_modified: HashSet<String> = HashSet::new();
        let mut commands_executed = 0u64;
        let mut errors_encountered = 0u64;
        let mut outcomes = Vec::new();

        let extra = self.extra_outcomes.lock().unwrap();
        for action in &actions {
            match &action.payload {
                ActionPayload::FileChange(fc) => {
                    files_modified.insert(fc.file_path.clone());
                }
                ActionPayload::Command(_) => commands_executed += 1,
                ActionPayload::Error(_) => errors_encountered += 1,
                ActionPayload::None => {}
            }
            if let Some(outcome) = derive_outcome(action) {
                outcomes.push(outcome);
            }
            if let Some(attached) = extra.get(&action.id) {
                outcomes.extend(attached.iter().cloned());
            }
        }
        drop(extra);

        let rate = success_rate(&outcomes);
        let status = if errors_encountered > 0 {
            TaskStatus::Error
        } else if rate > 0.8 {
            TaskStatus::Completed
        } else {
            TaskStatus::InProgress
        };

        Ok(TaskExecutionSummary {
            task_id: task_id.to_string(),
            task_description,
            start_time,
            end_time,
            duration_s: (end_time - start_time).num_milliseconds() as f64 / 1000.0,
            status,
            actions_count: actions.len() as u64,
            files_modified: files_modified.len() as u64,
            commands_executed,
            errors_encountered,
            verified_outcomes: outcomes,
            success_rate: rate,
        })
    }

    pub fn generate_session_history(&self, session_id: &str) -> Result<SessionExecutionHistory, HistoryError> {
        let actions = self.journal.get_actions(&Query { session_id: Some(session_id.to_string()), ..Default::default() })?;

        let mut task_ids: Vec<String> = actions.iter().filter_map(|a| a.task_id.clone()).collect();
        task_ids.sort();
        task_ids.dedup();

        let mut tasks = Vec::new();
        for task_id in &task_ids {
            match self.analyze_task_execution(task_id, Some(session_id)) {
                Ok(summary) => tasks.push(summary),
                Err(HistoryError::TaskNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        let all_outcomes: Vec<&VerifiedOutcome> = tasks.iter().flat_map(|t| t.verified_outcomes.iter()).collect();
        let overall_success_rate = if all_outcomes.is_empty() {
            0.0
        } else {
            all_outcomes.iter().filter(|o| o.status == OutcomeStatus::Success).count() as f64 / all_outcomes.len() as f64
        };

        let completed = tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
        let errored: Vec<&TaskExecutionSummary> = tasks.iter().filter(|t| t.status == TaskStatus::Error).collect();
        let total_files: u64 = tasks.iter().map(|t| t.files_modified).sum();

        let mut key_achievements = Vec::new();
        if completed > 0 {
            key_achievements.push(format!("{completed} task(s) completed successfully"));
        }
        if total_files > 0 {
            key_achievements.push(format!("{total_files} file(s) modified"));
        }

        let mut remaining_issues = Vec::new();
        for task in &errored {
            remaining_issues.push(format!("task '{}' encountered errors", task.task_id));
        }
        if total_files > 50 {
            remaining_issues.push(format!("large file-modification footprint ({total_files} files)"));
        }

        let mut recommendations = Vec::new();
        if !errored.is_empty() {
            recommendations.push("review error actions before proceeding".to_string());
        }
        if overall_success_rate < 0.5 && !tasks.is_empty() {
            recommendations.push("overall success rate is low; re-examine task plan".to_string());
        }

        Ok(SessionExecutionHistory {
            session_id: session_id.to_string(),
            tasks,
            overall_success_rate,
            key_achievements,
            remaining_issues,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_core::{CommandInfo, FileChange, FileChangeKind};

    fn journal_with_task(journal: &Journal, task_id: &str, session_id: &str) {
        let mut start = sbx_core::Action::new(ActionKind::TaskStart, "build the thing");
        start.session_id = Some(session_id.into());
        start.task_id = Some(task_id.into());
        journal.log_action(start).unwrap();

        journal
            .log_file_change(
                "write out.txt",
                Some(session_id.into()),
                Some(task_id.into()),
                FileChange {
                    file_path: "out.txt".into(),
                    change_type: FileChangeKind::Create,
                    before: None,
                    after: Some("done".into()),
                    timestamp: Utc::now(),
                },
            )
            .unwrap();

        journal
            .log_command(
                "run build",
                Some(session_id.into()),
                Some(task_id.into()),
                CommandInfo {
                    command: "make".into(),
                    working_directory: "/sandbox".into(),
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                    duration_s: 1.5,
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
    }

    #[test]
    fn completed_task_has_high_success_rate() {
        let journal = Journal::open_in_memory().unwrap();
        journal_with_task(&journal, "t1", "s1");
        let analyzer = HistoryAnalyzer::new(&journal);
        let summary = analyzer.analyze_task_execution("t1", Some("s1")).unwrap();
        assert_eq!(summary.status, TaskStatus::Completed);
        assert_eq!(summary.files_modified, 1);
        assert_eq!(summary.commands_executed, 1);
    }

    #[test]
    fn missing_task_is_not_found() {
        let journal = Journal::open_in_memory().unwrap();
        let analyzer = HistoryAnalyzer::new(&journal);
        assert!(matches!(
            analyzer.analyze_task_execution("nope", None),
            Err(HistoryError::TaskNotFound(_))
        ));
    }

    #[test]
    fn session_history_rolls_up_tasks() {
        let journal = Journal::open_in_memory().unwrap();
        journal_with_task(&journal, "t1", "s1");
        journal_with_task(&journal, "t2", "s1");
        let analyzer = HistoryAnalyzer::new(&journal);
        let history = analyzer.generate_session_history("s1").unwrap();
        assert_eq!(history.tasks.len(), 2);
        assert!(history.overall_success_rate > 0.8);
        assert!(!history.key_achievements.is_empty());
    }

    #[test]
    fn empty_session_is_null_safe() {
        let journal = Journal::open_in_memory().unwrap();
        let analyzer = HistoryAnalyzer::new(&journal);
        let history = analyzer.generate_session_history("ghost").unwrap();
        assert!(history.tasks.is_empty());
        assert_eq!(history.overall_success_rate, 0.0);
    }

    #[test]
    fn attached_outcome_counts_toward_success_rate() {
        let journal = Journal::open_in_memory().unwrap();
        let id = journal
            .log_command(
                "run lint",
                Some("s1".into()),
                Some("t1".into()),
                CommandInfo {
                    command: "eslint .".into(),
                    working_directory: "/sandbox".into(),
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: 0,
                    duration_s: 0.3,
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
        let analyzer = HistoryAnalyzer::new(&journal);
        analyzer.add_verified_outcome(
            &id,
            VerifiedOutcome::new(&id, "custom_check", OutcomeStatus::Success, "no lint warnings"),
        );
        let summary = analyzer.analyze_task_execution("t1", Some("s1")).unwrap();
        assert_eq!(summary.verified_outcomes.len(), 2);
    }
}
