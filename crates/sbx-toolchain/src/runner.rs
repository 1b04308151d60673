use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use sbx_core::{CommandInfo, Isolate, OutcomeStatus, SecurityPolicy, VerifiedOutcome};
use sbx_history::HistoryAnalyzer;
use sbx_journal::Journal;
use sbx_security::validate_command;
use tokio::process::Command;

use crate::detect::BuildSystem;
use crate::error::ToolchainError;
use crate::verbs::{command_for, Verb};

#[derive(Clone, Debug, Default)]
pub struct InvocationOptions {
    pub env_overrides: HashMap<String, String>,
    pub timeout_override_s: Option<u64>,
}

#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct InvocationEvidence {
    pub artifacts_added: i64,
    pub warnings: u64,
    pub errors: u64,
    pub tests_run: Option<u64>,
    pub tests_passed: Option<u64>,
    pub tests_failed: Option<u64>,
    pub tests_skipped: Option<u64>,
    pub coverage_percent: Option<f64>,
}

fn count_files(root: &Path) -> u64 {
    let mut count = 0u64;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else {
                count += 1;
            }
        }
    }
    count
}

fn parse_evidence(test_framework: Option<&str>, stdout: &str, stderr: &str) -> InvocationEvidence {
    let combined = format!("{stdout}\n{stderr}");
    let warnings = Regex::new(r"(?i)\bwarning\b").unwrap().find_iter(&combined).count() as u64;
    let errors = Regex::new(r"(?i)\berror\b").unwrap().find_iter(&combined).count() as u64;

    let mut evidence = InvocationEvidence { warnings, errors, ..Default::default() };

    match test_framework {
        Some("pytest") => {
            if let Some(caps) = Regex::new(r"(\d+) passed(?:, (\d+) failed)?(?:, (\d+) skipped)?")
                .unwrap()
                .captures(&combined)
            {
                let passed: u64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
                let failed: u64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
                let skipped: u64 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
                evidence.tests_passed = Some(passed);
                evidence.tests_failed = Some(failed);
                evidence.tests_skipped = Some(skipped);
                evidence.tests_run = Some(passed + failed + skipped);
            }
        }
        Some("cargo-test") => {
            if let Some(caps) = Regex::new(r"test result: \w+\. (\d+) passed; (\d+) failed; (\d+) ignored")
                .unwrap()
                .captures(&combined)
            {
                let passed: u64 = caps[1].parse().unwrap_or(0);
                let failed: u64 = caps[2].parse().unwrap_or(0);
                let skipped: u64 = caps[3].parse().unwrap_or(0);
                evidence.tests_passed = Some(passed);
                evidence.tests_failed = Some(failed);
                evidence.tests_skipped = Some(skipped);
                evidence.tests_run = Some(passed + failed + skipped);
            }
        }
        _ => {}
    }

    if let Some(caps) = Regex::new(r"(?i)coverage[:\s]+(\d+(?:\.\d+)?)%").unwrap().captures(&combined) {
        evidence.coverage_percent = caps.get(1).and_then(|m| m.as_str().parse().ok());
    }

    evidence
}

/// Spawns toolchain commands for an isolate, validates them against the
/// security policy, and records a verified outcome for each invocation.
pub struct ToolchainRunner<'a> {
    journal: &'a Journal,
}

impl<'a> ToolchainRunner<'a> {
    pub fn new(journal: &'a Journal) -> Self {
        Self { journal }
    }

    pub async fn run_verb(
        &self,
        verb: Verb,
        build_system: BuildSystem,
        test_framework: Option<&str>,
        isolate: &Isolate,
        policy: &SecurityPolicy,
        session_id: Option<&str>,
        task_id: Option<&str>,
        opts: InvocationOptions,
    ) -> Result<(CommandInfo, InvocationEvidence), ToolchainError> {
        let argv = command_for(verb, build_system)
            .ok_or_else(|| ToolchainError::UnsupportedVerb(format!("{verb:?}"), format!("{build_system:?}")))?;
        let line = argv.join(" ");

        if !validate_command(&line, isolate, policy) {
            tracing::warn!(command = %line, verb = ?verb, "toolchain invocation denied by policy");
            return Err(ToolchainError::CommandDenied(line));
        }

        let before = count_files(&isolate.sandbox_path);
        let started = Utc::now();
        let timeout_s = opts.timeout_override_s.unwrap_or(policy.max_execution_time_s);

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.current_dir(&isolate.sandbox_path);
        cmd.env("SANDBOX_WORKSPACE", isolate.sandbox_path.display().to_string());
        if let Some(sid) = session_id {
            cmd.env("SANDBOX_SESSION_ID", sid);
        }
        cmd.env("SANDBOX_TMP", isolate.sandbox_path.join(".sandbox").join("tmp").display().to_string());
        for (k, v) in &opts.env_overrides {
            cmd.env(k, v);
        }
        cmd.kill_on_drop(true);

        let info = match tokio::time::timeout(Duration::from_secs(timeout_s), cmd.output()).await {
            Ok(Ok(output)) => CommandInfo {
                command: line.clone(),
                working_directory: isolate.sandbox_path.display().to_string(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                duration_s: (Utc::now() - started).num_milliseconds() as f64 / 1000.0,
                timestamp: Utc::now(),
            },
            Ok(Err(e)) => return Err(ToolchainError::Io(e)),
            Err(_) => CommandInfo {
                command: line.clone(),
                working_directory: isolate.sandbox_path.display().to_string(),
                stdout: String::new(),
                stderr: format!("command timed out after {timeout_s}s"),
                exit_code: -1,
                duration_s: timeout_s as f64,
                timestamp: Utc::now(),
            },
        };

        let after = count_files(&isolate.sandbox_path);
        let mut evidence = parse_evidence(test_framework, &info.stdout, &info.stderr);
        evidence.artifacts_added = after as i64 - before as i64;

        let action_id = self.journal.log_command(
            format!("{verb:?} via {build_system:?}"),
            session_id.map(str::to_string),
            task_id.map(str::to_string),
            info.clone(),
        )?;

        // A zero exit code with failing tests is Partial here, not Success:
        // the generic command outcome derived by the history analyzer treats
        // exit_code == 0 as Success, but the toolchain adapter has the test
        // counts to know better.
        let status = if !info.succeeded() {
            OutcomeStatus::Failure
        } else if evidence.tests_failed.is_some_and(|f| f > 0) {
            OutcomeStatus::Partial
        } else {
            OutcomeStatus::Success
        };
        let outcome = VerifiedOutcome::new(&action_id, "toolchain_invocation", status, line.clone())
            .with_evidence("artifacts_added", evidence.artifacts_added.to_string())
            .with_evidence("warnings", evidence.warnings.to_string())
            .with_evidence("errors", evidence.errors.to_string());
        HistoryAnalyzer::new(self.journal).add_verified_outcome(&action_id, outcome);

        Ok((info, evidence))
    }
}
