use std::path::{Path, PathBuf};

use sbx_core::{Isolate, IsolateStatus, IsolationConfig, SecurityPolicy};
use sbx_security::resource::{NoopResourceBackend, ResourceBackend};

use crate::clone::{clone_tree, has_git_repository, merge_tree, preserve_git_history};
use crate::error::IsolateError;

/// Builds, merges back, and destroys isolates under a single manager root.
pub struct IsolateBuilder {
    manager_root: PathBuf,
    policy: SecurityPolicy,
    backend: Box<dyn ResourceBackend + Send + Sync>,
}

impl IsolateBuilder {
    pub fn new(manager_root: impl Into<PathBuf>, policy: SecurityPolicy) -> Self {
        Self { manager_root: manager_root.into(), policy, backend: Box::new(NoopResourceBackend) }
    }

    pub fn with_backend(mut self, backend: Box<dyn ResourceBackend + Send + Sync>) -> Self {
        self.backend = backend;
        self
    }

    pub fn create_isolate(
        &self,
        source: &Path,
        id: Option<String>,
        isolation_config: Option<IsolationConfig>,
    ) -> Result<Isolate, IsolateError> {
        if !source.exists() {
            return Err(IsolateError::SourceMissing(source.display().to_string()));
        }
        if !source.is_dir() {
            return Err(IsolateError::SourceNotDirectory(source.display().to_string()));
        }

        let id = id.unwrap_or_else(|| ulid::Ulid::new().to_string());
        let sandbox_path = self.manager_root.join(format!("workspace_{id}"));
        let isolation_config = isolation_config.unwrap_or_default();

        let mut isolate = Isolate::new(id.clone(), source.to_path_buf(), sandbox_path.clone(), isolation_config);

        if let Err(e) = clone_tree(source, &sandbox_path) {
            let _ = std::fs::remove_dir_all(&sandbox_path);
            return Err(e);
        }

        if has_git_repository(source) {
            preserve_git_history(source, &sandbox_path);
        }

        match self.backend.apply_resource_limits(&isolate, &self.policy) {
            Ok(()) => {
                isolate.status = IsolateStatus::Active;
            }
            Err(e) => {
                tracing::error!(isolate_id = %id, error = %e, "security setup failed for isolate");
                isolate.status = IsolateStatus::Error;
            }
        }

        tracing::info!(isolate_id = %id, source = %source.display(), sandbox = %sandbox_path.display(), "isolate created");
        Ok(isolate)
    }

    pub fn merge_back(&self, isolate: &Isolate, target: &Path) -> bool {
        if !isolate.sandbox_path.exists() || !target.exists() {
            return false;
        }
        match merge_tree(&isolate.sandbox_path, target) {
            Ok(()) => {
                tracing::info!(isolate_id = %isolate.id, "merged changes back to source");
                true
            }
            Err(e) => {
                tracing::error!(isolate_id = %isolate.id, error = %e, "merge back failed");
                false
            }
        }
    }

    pub fn destroy(&self, isolate: &mut Isolate) -> bool {
        let mut success = true;
        if isolate.sandbox_path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&isolate.sandbox_path) {
                tracing::warn!(isolate_id = %isolate.id, error = %e, "failed to remove sandbox directory");
                success = false;
            }
        }
        isolate.status = IsolateStatus::Destroyed;
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy() -> SecurityPolicy {
        SecurityPolicy::default()
    }

    #[test]
    fn create_isolate_clones_source_and_activates() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("main.rs"), b"fn main() {}").unwrap();
        let root = tempdir().unwrap();

        let builder = IsolateBuilder::new(root.path(), policy());
        let isolate = builder.create_isolate(source.path(), None, None).unwrap();

        assert_eq!(isolate.status, IsolateStatus::Active);
        assert!(isolate.sandbox_path.join("main.rs").exists());
    }

    #[test]
    fn create_isolate_rejects_missing_source() {
        let root = tempdir().unwrap();
        let builder = IsolateBuilder::new(root.path(), policy());
        let err = builder.create_isolate(Path::new("/nonexistent/path/xyz"), None, None).unwrap_err();
        assert!(matches!(err, IsolateError::SourceMissing(_)));
    }

    #[test]
    fn destroy_removes_sandbox_dir_and_flags_destroyed() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"x").unwrap();
        let root = tempdir().unwrap();
        let builder = IsolateBuilder::new(root.path(), policy());
        let mut isolate = builder.create_isolate(source.path(), None, None).unwrap();

        assert!(builder.destroy(&mut isolate));
        assert_eq!(isolate.status, IsolateStatus::Destroyed);
        assert!(!isolate.sandbox_path.exists());
    }

    #[test]
    fn merge_back_copies_sandbox_contents_to_target() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"original").unwrap();
        let root = tempdir().unwrap();
        let builder = IsolateBuilder::new(root.path(), policy());
        let isolate = builder.create_isolate(source.path(), None, None).unwrap();

        std::fs::write(isolate.sandbox_path.join("b.txt"), b"new file").unwrap();

        let target = tempdir().unwrap();
        assert!(builder.merge_back(&isolate, target.path()));
        assert!(target.path().join("b.txt").exists());
    }
}
