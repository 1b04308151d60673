use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Duration;
use sbx_cache::CacheManager;
use sbx_core::{
    Action, CommandInfo, ErrorInfo, FileChange, FileChangeKind, IsolationConfig, SecurityPolicy,
    Session,
};
use sbx_governor::{ResourceGovernor, ShutdownSignal};
use sbx_history::{HistoryAnalyzer, SessionExecutionHistory, TaskExecutionSummary};
use sbx_journal::{Journal, Query};
use sbx_lifecycle::{LifecycleManager, WorkspaceStatus};
use sbx_security::{FileOp, Operation, SecurityMediator, SecurityStatus};
use sbx_toolchain::{
    detect_build_system, detect_test_framework, detect_toolchain, InvocationEvidence,
    InvocationOptions, ToolchainRunner, Verb,
};

use crate::error::SandboxError;

const DEFAULT_MONITOR_INTERVAL_S: u64 = 60;
const DEFAULT_CLEANUP_INTERVAL_S: u64 = 900;

/// Top-level facade wiring the security mediator, isolate builder,
/// action journal, cache fabric, resource governor, history analyzer,
/// and toolchain adapter behind one API surface. This is the only type
/// most callers need to reach for; everything else in the workspace is
/// a component it composes.
pub struct Sandbox {
    policy: SecurityPolicy,
    lifecycle: LifecycleManager,
    journal: Journal,
    cache: Arc<Mutex<CacheManager>>,
    governor: Arc<ResourceGovernor>,
    shutdown: ShutdownSignal,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl Sandbox {
    /// Build a sandbox from a loaded [`sbx_config::SandboxConfig`], rooted
    /// at `manager_root` with state under the config's XDG-resolved paths.
    pub fn from_config(
        manager_root: impl Into<PathBuf>,
        journal_path: &Path,
        cache_dir: impl Into<PathBuf>,
        config: &sbx_config::SandboxConfig,
    ) -> Result<Self, SandboxError> {
        Self::with_intervals(
            manager_root,
            journal_path,
            cache_dir,
            config.policy.clone(),
            config.resource_limits.clone(),
            config.max_concurrent_workspaces as usize,
            Duration::seconds(config.session_timeout_s as i64),
            config.cache_budget_mb,
            config.monitor_interval_s,
            config.cleanup_interval_s,
        )
    }

    /// Build a sandbox rooted at `manager_root`, with isolates created
    /// under it, an on-disk journal at `journal_path`, and a cache
    /// fabric under `cache_dir` budgeted to `cache_budget_mb`. The
    /// governor's monitor/cleanup worker threads run on the ambient
    /// defaults (60 s / 900 s); use [`Sandbox::from_config`] to override.
    pub fn new(
        manager_root: impl Into<PathBuf>,
        journal_path: &Path,
        cache_dir: impl Into<PathBuf>,
        policy: SecurityPolicy,
        resource_limits: sbx_core::ResourceLimits,
        max_concurrent_workspaces: usize,
        session_timeout: Duration,
        cache_budget_mb: u64,
    ) -> Result<Self, SandboxError> {
        Self::with_intervals(
            manager_root,
            journal_path,
            cache_dir,
            policy,
            resource_limits,
            max_concurrent_workspaces,
            session_timeout,
            cache_budget_mb,
            DEFAULT_MONITOR_INTERVAL_S,
            DEFAULT_CLEANUP_INTERVAL_S,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn with_intervals(
        manager_root: impl Into<PathBuf>,
        journal_path: &Path,
        cache_dir: impl Into<PathBuf>,
        policy: SecurityPolicy,
        resource_limits: sbx_core::ResourceLimits,
        max_concurrent_workspaces: usize,
        session_timeout: Duration,
        cache_budget_mb: u64,
        monitor_interval_s: u64,
        cleanup_interval_s: u64,
    ) -> Result<Self, SandboxError> {
        let manager_root = manager_root.into();

        let journal = if journal_path.as_os_str().is_empty() {
            Journal::open_in_memory()?
        } else {
            Journal::open(journal_path)?
        };
        let cache = Arc::new(Mutex::new(CacheManager::new(cache_dir, cache_budget_mb * 1024 * 1024)?));
        let governor = Arc::new(ResourceGovernor::new(resource_limits, manager_root.clone(), cache.clone()));
        let lifecycle = LifecycleManager::new(manager_root, policy.clone(), max_concurrent_workspaces, session_timeout)
            .with_backend(Box::new(governor.clone()));

        let shutdown = ShutdownSignal::new();
        let workers = vec![
            spawn_loop(governor.clone(), shutdown.clone(), std::time::Duration::from_secs(monitor_interval_s), |g, s, i| {
                g.run_monitor_loop(i, s)
            }),
            spawn_loop(governor.clone(), shutdown.clone(), std::time::Duration::from_secs(cleanup_interval_s), |g, s, i| {
                g.run_cleanup_loop(i, s)
            }),
        ];

        Ok(Self { policy, lifecycle, journal, cache, governor, shutdown, workers: Mutex::new(workers) })
    }

    fn mediator(&self) -> SecurityMediator<'_> {
        SecurityMediator::new(&self.policy)
    }

    pub fn create_session(
        &self,
        source: &Path,
        session_id: Option<String>,
        isolation_config: Option<IsolationConfig>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Session, SandboxError> {
        Ok(self.lifecycle.create_workspace(source, session_id, isolation_config, metadata)?)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, SandboxError> {
        Ok(self.lifecycle.get_session(session_id)?)
    }

    pub fn suspend(&self, session_id: &str) -> Result<(), SandboxError> {
        Ok(self.lifecycle.suspend_workspace(session_id)?)
    }

    pub fn resume(&self, session_id: &str) -> Result<(), SandboxError> {
        Ok(self.lifecycle.resume_workspace(session_id)?)
    }

    pub fn merge_back(&self, session_id: &str, target: &Path) -> Result<bool, SandboxError> {
        Ok(self.lifecycle.merge_workspace_changes(session_id, target)?)
    }

    pub fn destroy(&self, session_id: &str) -> Result<bool, SandboxError> {
        Ok(self.lifecycle.destroy_workspace(session_id)?)
    }

    pub fn workspace_status(&self, session_id: &str) -> Result<WorkspaceStatus, SandboxError> {
        Ok(self.lifecycle.get_workspace_status(session_id)?)
    }

    /// Comprehensive security snapshot for a session's isolate: enforced
    /// policy limits composed with the governor's live resource sample.
    pub fn security_status(&self, session_id: &str) -> Result<SecurityStatus, SandboxError> {
        let session = self.get_session(session_id)?;
        Ok(self.mediator().security_status(&session.isolate, self.governor.as_ref()))
    }

    /// Validate `line` against the isolate's policy, run it, and log the
    /// result to the journal. The verified outcome is derived lazily by
    /// [`HistoryAnalyzer`] at read time; this method does not attach one.
    pub async fn run_command(
        &self,
        session_id: &str,
        line: &str,
        working_dir: Option<&Path>,
        timeout_override_s: Option<u64>,
        session_task_id: Option<&str>,
    ) -> Result<CommandInfo, SandboxError> {
        let session = self.get_session(session_id)?;

        if !self.mediator().validate_operation(&Operation::Command(line), &session.isolate) {
            tracing::warn!(session_id, command = %line, "command rejected by mediator");
            return Err(SandboxError::Denied(format!("command rejected by policy: {line}")));
        }

        let cwd = working_dir.unwrap_or(&session.isolate.sandbox_path).to_path_buf();
        let timeout_s = timeout_override_s.unwrap_or(self.policy.max_execution_time_s);
        let started = chrono::Utc::now();

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(line);
        cmd.current_dir(&cwd);
        cmd.env("SANDBOX_WORKSPACE", session.isolate.sandbox_path.display().to_string());
        cmd.env("SANDBOX_SESSION_ID", session_id);
        cmd.env("SANDBOX_TMP", session.isolate.sandbox_path.join(".sandbox").join("tmp").display().to_string());
        cmd.kill_on_drop(true);

        let info = match tokio::time::timeout(std::time::Duration::from_secs(timeout_s), cmd.output()).await {
            Ok(Ok(output)) => CommandInfo {
                command: line.to_string(),
                working_directory: cwd.display().to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                duration_s: (chrono::Utc::now() - started).num_milliseconds() as f64 / 1000.0,
                timestamp: chrono::Utc::now(),
            },
            Ok(Err(e)) => return Err(SandboxError::Io(e)),
            Err(_) => CommandInfo {
                command: line.to_string(),
                working_directory: cwd.display().to_string(),
                stdout: String::new(),
                stderr: "command timed out".to_string(),
                exit_code: -1,
                duration_s: timeout_s as f64,
                timestamp: chrono::Utc::now(),
            },
        };

        self.journal.log_command(
            format!("run: {line}"),
            Some(session_id.to_string()),
            session_task_id.map(str::to_string),
            info.clone(),
        )?;

        if !info.succeeded() {
            self.journal.log_error(
                format!("command failed: {line}"),
                Some(session_id.to_string()),
                session_task_id.map(str::to_string),
                ErrorInfo {
                    error_type: "command_failure".to_string(),
                    message: info.stderr.clone(),
                    stack_trace: None,
                    context: HashMap::new(),
                    timestamp: chrono::Utc::now(),
                },
            )?;
        }

        Ok(info)
    }

    /// Validate and perform a file operation inside a session's isolate.
    /// Only `Write` and `Delete` mutate state and are logged as a
    /// [`FileChange`]; `Read`/`Execute` touch nothing and leave no change
    /// record, since a no-op `before == after` entry would otherwise be
    /// read back as a failed modification.
    pub fn file_op(
        &self,
        session_id: &str,
        op: FileOp,
        relative_path: &Path,
        content: Option<&[u8]>,
        session_task_id: Option<&str>,
    ) -> Result<(), SandboxError> {
        let session = self.get_session(session_id)?;
        let full_path = session.isolate.sandbox_path.join(relative_path);

        let existing_size_bytes = std::fs::metadata(&full_path).ok().map(|m| m.len());
        let current_file_count = count_files(&session.isolate.sandbox_path);

        if !self.mediator().validate_operation(
            &Operation::FileOp { op, path: &full_path, existing_size_bytes, current_file_count },
            &session.isolate,
        ) {
            return Err(SandboxError::Denied(format!("file operation rejected by policy: {}", relative_path.display())));
        }

        let existed_before = full_path.exists();
        let before = existed_before.then(|| std::fs::read_to_string(&full_path).unwrap_or_default());

        match op {
            FileOp::Write => {
                if let Some(parent) = full_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&full_path, content.unwrap_or_default())?;
            }
            FileOp::Delete => {
                if full_path.is_dir() {
                    std::fs::remove_dir_all(&full_path)?;
                } else {
                    std::fs::remove_file(&full_path)?;
                }
            }
            FileOp::Read | FileOp::Execute => return Ok(()),
        }

        let change_type = match op {
            FileOp::Write if existed_before => FileChangeKind::Modify,
            FileOp::Write => FileChangeKind::Create,
            FileOp::Delete => FileChangeKind::Delete,
            FileOp::Read | FileOp::Execute => unreachable!("returned above"),
        };
        let after = std::fs::read_to_string(&full_path).ok();

        self.journal.log_file_change(
            format!("{op:?} {}", relative_path.display()),
            Some(session_id.to_string()),
            session_task_id.map(str::to_string),
            FileChange {
                file_path: relative_path.display().to_string(),
                change_type,
                before,
                after,
                timestamp: chrono::Utc::now(),
            },
        )?;

        Ok(())
    }

    /// Detect the isolate's toolchain and run one verb through it,
    /// attaching a verified outcome built from parsed command evidence.
    pub async fn toolchain_run(
        &self,
        session_id: &str,
        verb: Verb,
        opts: InvocationOptions,
        session_task_id: Option<&str>,
    ) -> Result<(CommandInfo, InvocationEvidence), SandboxError> {
        let session = self.get_session(session_id)?;
        let toolchain = detect_toolchain(&session.isolate.sandbox_path);
        let build_system = detect_build_system(&session.isolate.sandbox_path, toolchain);
        let test_framework = detect_test_framework(&session.isolate.sandbox_path, toolchain);

        let runner = ToolchainRunner::new(&self.journal);
        let (info, evidence) = runner
            .run_verb(
                verb,
                build_system,
                test_framework.as_deref(),
                &session.isolate,
                &self.policy,
                Some(session_id),
                session_task_id,
                opts,
            )
            .await?;

        Ok((info, evidence))
    }

    pub fn task_summary(&self, task_id: &str, session_id: Option<&str>) -> Result<TaskExecutionSummary, SandboxError> {
        let analyzer = HistoryAnalyzer::new(&self.journal);
        Ok(analyzer.analyze_task_execution(task_id, session_id)?)
    }

    pub fn session_history(&self, session_id: &str) -> Result<SessionExecutionHistory, SandboxError> {
        let analyzer = HistoryAnalyzer::new(&self.journal);
        Ok(analyzer.generate_session_history(session_id)?)
    }

    /// Look up a cached analysis result by workspace path, skipping the
    /// cache entirely when any file's current mtime has moved past what
    /// was recorded when the entry was cached.
    pub fn cache_lookup(
        &self,
        workspace_path: &Path,
        current_timestamps: &HashMap<String, chrono::DateTime<chrono::Utc>>,
    ) -> Option<serde_json::Value> {
        let hash = CacheManager::workspace_hash(workspace_path);
        let mut cache = self.cache.lock().unwrap();
        if !cache.analysis.is_analysis_valid(&hash, current_timestamps) {
            return None;
        }
        cache.analysis.get_analysis(&hash)
    }

    pub fn cache_store(
        &self,
        workspace_path: &Path,
        analysis: serde_json::Value,
        file_timestamps: HashMap<String, chrono::DateTime<chrono::Utc>>,
        ttl: Option<Duration>,
    ) -> Result<(), SandboxError> {
        let hash = CacheManager::workspace_hash(workspace_path);
        self.cache.lock().unwrap().analysis.cache_analysis(&hash, analysis, file_timestamps, ttl)?;
        Ok(())
    }

    /// Combined size/entry-count health across all three cache fabrics.
    pub fn cache_health(&self) -> sbx_cache::CacheHealth {
        self.cache.lock().unwrap().get_cache_health()
    }

    pub fn journal_query(&self, query: &Query) -> Result<Vec<Action>, SandboxError> {
        Ok(self.journal.get_actions(query)?)
    }

    pub fn cleanup_expired_sessions(&self) -> u64 {
        self.lifecycle.cleanup_expired_sessions()
    }

    /// Destroy every remaining session, then stop the governor's monitor
    /// and cleanup worker threads, waiting for both to drain.
    pub fn shutdown(&self) {
        self.lifecycle.shutdown();
        self.shutdown.signal();
        let handles = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// Spawn a dedicated worker thread running `run` against `governor` until
/// `shutdown` fires, matching the governor's own condition-variable sleep
/// convention rather than pulling in an event-loop runtime for two plain
/// periodic loops.
fn spawn_loop<F>(
    governor: Arc<ResourceGovernor>,
    shutdown: ShutdownSignal,
    interval: std::time::Duration,
    run: F,
) -> std::thread::JoinHandle<()>
where
    F: Fn(&ResourceGovernor, &ShutdownSignal, std::time::Duration) + Send + 'static,
{
    std::thread::spawn(move || run(&governor, &shutdown, interval))
}

fn count_files(root: &Path) -> u64 {
    let mut count = 0;
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                count += count_files(&path);
            } else {
                count += 1;
            }
        }
    }
    count
}
