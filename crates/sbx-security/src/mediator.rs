use std::path::Path;

use sbx_core::{Isolate, ResourceUsage, SecurityPolicy};
use serde::Serialize;

use crate::command;
use crate::filesystem::{self, FileOp};
use crate::network;
use crate::resource::ResourceBackend;

#[derive(Clone, Debug, Serialize)]
pub struct PolicySummary {
    pub filesystem_controls: usize,
    pub command_restrictions: usize,
    pub network_isolation: bool,
    pub max_cpu_percent: f32,
    pub max_memory_mb: u64,
    pub max_disk_mb: u64,
    pub max_processes: u32,
}

/// Comprehensive security snapshot for one isolate, composing the policy's
/// enforced limits with the backend's live resource sample.
#[derive(Clone, Debug, Serialize)]
pub struct SecurityStatus {
    pub isolate_id: String,
    pub policy: PolicySummary,
    pub resource_usage: ResourceUsage,
    pub isolation_active: bool,
    pub container_id: Option<String>,
}

/// The kind of operation an external caller wants mediated.
pub enum Operation<'a> {
    Path(&'a Path),
    FileOp {
        op: FileOp,
        path: &'a Path,
        existing_size_bytes: Option<u64>,
        current_file_count: u64,
    },
    Command(&'a str),
    Network { host: &'a str, port: Option<u16> },
}

/// Aggregate façade over the four sub-mediators. Any internal error
/// counts as deny, never allow: callers get a plain bool, never a panic.
pub struct SecurityMediator<'a> {
    policy: &'a SecurityPolicy,
}

impl<'a> SecurityMediator<'a> {
    pub fn new(policy: &'a SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn validate_operation(&self, operation: &Operation<'_>, isolate: &Isolate) -> bool {
        match operation {
            Operation::Path(path) => filesystem::validate_path(path, isolate, self.policy),
            Operation::FileOp {
                op,
                path,
                existing_size_bytes,
                current_file_count,
            } => filesystem::validate_file_operation(
                *op,
                path,
                isolate,
                self.policy,
                *existing_size_bytes,
                *current_file_count,
            ),
            Operation::Command(line) => command::validate_command(line, isolate, self.policy),
            Operation::Network { host, port } => network::validate_network_access(host, *port, self.policy),
        }
    }

    pub fn apply_resource_limits(&self, isolate: &Isolate, backend: &dyn ResourceBackend) {
        if let Err(e) = backend.apply_resource_limits(isolate, self.policy) {
            tracing::warn!(isolate = %isolate.id, error = %e, "failed to apply resource limits");
        }
    }

    /// Comprehensive security snapshot for `isolate`: enforced policy
    /// limits alongside the backend's current resource sample.
    pub fn security_status(&self, isolate: &Isolate, backend: &dyn ResourceBackend) -> SecurityStatus {
        let resource_usage = backend.monitor_resource_usage(isolate).unwrap_or_else(|e| {
            tracing::warn!(isolate = %isolate.id, error = %e, "resource sample unavailable for security status");
            ResourceUsage::sample_now(0, 0, 0.0, 0, 0)
        });

        SecurityStatus {
            isolate_id: isolate.id.clone(),
            policy: PolicySummary {
                filesystem_controls: self.policy.blocked_paths.len(),
                command_restrictions: self.policy.blocked_commands.len(),
                network_isolation: !self.policy.allow_network,
                max_cpu_percent: self.policy.max_cpu_percent,
                max_memory_mb: self.policy.max_memory_mb,
                max_disk_mb: self.policy.max_disk_mb,
                max_processes: self.policy.max_processes,
            },
            resource_usage,
            isolation_active: isolate.isolation_config.use_container,
            container_id: isolate.metadata.get("container_id").cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoopResourceBackend;
    use sbx_core::IsolationConfig;
    use tempfile::tempdir;

    #[test]
    fn denies_route_through_correct_sub_mediator() {
        let dir = tempdir().unwrap();
        let isolate = Isolate::new(
            "iso1".into(),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
            IsolationConfig::default(),
        );
        let policy = SecurityPolicy::default();
        let mediator = SecurityMediator::new(&policy);

        assert!(!mediator.validate_operation(&Operation::Command("sudo ls"), &isolate));
        assert!(mediator.validate_operation(&Operation::Command("ls"), &isolate));
        assert!(!mediator.validate_operation(&Operation::Network { host: "evil.example", port: None }, &isolate));
    }

    #[test]
    fn apply_resource_limits_never_panics_on_backend_error() {
        let dir = tempdir().unwrap();
        let isolate = Isolate::new(
            "iso1".into(),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
            IsolationConfig::default(),
        );
        let policy = SecurityPolicy::default();
        let mediator = SecurityMediator::new(&policy);
        mediator.apply_resource_limits(&isolate, &NoopResourceBackend);
    }
}
