use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an [`Isolate`]. Transitions form a monotonic DAG:
/// `Creating -> Active <-> Suspended -> Destroyed`, with `Error` reachable
/// (and terminal) from any state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolateStatus {
    Creating,
    Active,
    Suspended,
    Destroyed,
    Error,
}

impl IsolateStatus {
    /// Whether transitioning from `self` to `next` is a legal move.
    pub fn can_transition_to(self, next: IsolateStatus) -> bool {
        use IsolateStatus::*;
        if next == Error {
            return self != Destroyed;
        }
        matches!(
            (self, next),
            (Creating, Active)
                | (Active, Suspended)
                | (Suspended, Active)
                | (Active, Destroyed)
                | (Suspended, Destroyed)
        )
    }
}

/// Configuration for how an isolate is provisioned and constrained.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IsolationConfig {
    pub use_container: bool,
    pub image: String,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
    pub disk_limit: Option<String>,
    pub network_isolation: bool,
    pub allowed_hosts: Vec<String>,
    pub env_vars: HashMap<String, String>,
    pub mount_points: HashMap<String, String>,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            use_container: false,
            image: "ubuntu:22.04".to_string(),
            cpu_limit: None,
            memory_limit: None,
            disk_limit: None,
            network_isolation: true,
            allowed_hosts: Vec::new(),
            env_vars: HashMap::new(),
            mount_points: HashMap::new(),
        }
    }
}

/// A materialized clone of a host directory, isolated under a
/// manager-owned root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Isolate {
    pub id: String,
    pub source_path: PathBuf,
    pub sandbox_path: PathBuf,
    pub isolation_config: IsolationConfig,
    pub created_at: DateTime<Utc>,
    pub status: IsolateStatus,
    pub metadata: HashMap<String, String>,
}

impl Isolate {
    pub fn new(id: String, source_path: PathBuf, sandbox_path: PathBuf, isolation_config: IsolationConfig) -> Self {
        Self {
            id,
            source_path,
            sandbox_path,
            isolation_config,
            created_at: Utc::now(),
            status: IsolateStatus::Creating,
            metadata: HashMap::new(),
        }
    }

    /// Container id, if this isolate is container-backed and one has been recorded.
    pub fn container_id(&self) -> Option<&str> {
        self.metadata.get("container_id").map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creating_to_active_is_legal() {
        assert!(IsolateStatus::Creating.can_transition_to(IsolateStatus::Active));
    }

    #[test]
    fn destroyed_is_terminal() {
        assert!(!IsolateStatus::Destroyed.can_transition_to(IsolateStatus::Active));
        assert!(!IsolateStatus::Destroyed.can_transition_to(IsolateStatus::Error));
    }

    #[test]
    fn active_can_suspend_and_resume() {
        assert!(IsolateStatus::Active.can_transition_to(IsolateStatus::Suspended));
        assert!(IsolateStatus::Suspended.can_transition_to(IsolateStatus::Active));
    }

    #[test]
    fn error_reachable_from_non_destroyed_states() {
        assert!(IsolateStatus::Creating.can_transition_to(IsolateStatus::Error));
        assert!(IsolateStatus::Active.can_transition_to(IsolateStatus::Error));
    }
}
