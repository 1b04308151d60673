use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Duration;
use sbx_core::{
    CoreError, Isolate, IsolationConfig, LifecycleEventData, LifecycleEventHandler,
    LifecycleEventKind, Session,
};
use sbx_isolate::IsolateBuilder;

use crate::error::LifecycleError;

/// A composite view over a session's bookkeeping and its isolate.
#[derive(Clone, Debug, serde::Serialize)]
pub struct WorkspaceStatus {
    pub session_id: String,
    pub isolate_status: sbx_core::IsolateStatus,
    pub sandbox_path: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_accessed: chrono::DateTime<chrono::Utc>,
    pub access_count: u64,
    pub metadata: HashMap<String, String>,
}

struct Inner {
    sessions: HashMap<String, Session>,
    handlers: Vec<LifecycleEventHandler>,
}

/// Owns the in-memory session table and dispatches lifecycle events.
/// Mirrors the teacher's session-management API shape (free operations
/// keyed by session id, returning `Result<T>`) over an in-memory map
/// instead of on-disk directories.
pub struct LifecycleManager {
    inner: Mutex<Inner>,
    builder: IsolateBuilder,
    max_concurrent: usize,
    session_timeout: Duration,
}

impl LifecycleManager {
    pub fn new(manager_root: impl Into<std::path::PathBuf>, policy: sbx_core::SecurityPolicy, max_concurrent: usize, session_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner { sessions: HashMap::new(), handlers: Vec::new() }),
            builder: IsolateBuilder::new(manager_root, policy),
            max_concurrent,
            session_timeout,
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn sbx_security::resource::ResourceBackend + Send + Sync>) -> Self {
        self.builder = self.builder.with_backend(backend);
        self
    }

    pub fn on_event(&self, handler: impl Fn(&LifecycleEventData) + Send + Sync + 'static) {
        self.inner.lock().unwrap().handlers.push(Box::new(handler));
    }

    fn emit(&self, event: LifecycleEventData) {
        let inner = self.inner.lock().unwrap();
        for handler in &inner.handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                tracing::error!(kind = ?event.event_kind, "lifecycle event handler panicked");
            }
        }
    }

    pub fn create_workspace(
        &self,
        source: &Path,
        session_id: Option<String>,
        isolation_config: Option<IsolationConfig>,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<Session, LifecycleError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.sessions.len() >= self.max_concurrent {
                drop(inner);
                self.cleanup_expired_sessions();
                inner = self.inner.lock().unwrap();
                if inner.sessions.len() >= self.max_concurrent {
                    return Err(LifecycleError::Core(CoreError::CapacityExceeded {
                        current: inner.sessions.len() as u32,
                        max: self.max_concurrent as u32,
                    }));
                }
            }
            if let Some(id) = &session_id {
                if inner.sessions.contains_key(id) {
                    return Err(LifecycleError::SessionExists(id.clone()));
                }
            }
        }

        let session_id = session_id.unwrap_or_else(|| ulid::Ulid::new().to_string());
        self.emit(LifecycleEventData::new(LifecycleEventKind::SessionStarted, &session_id));

        let isolate = self.builder.create_isolate(source, Some(session_id.clone()), isolation_config)?;
        let mut session = Session::new(session_id.clone(), isolate);
        if let Some(meta) = metadata {
            session.metadata = meta;
        }

        self.inner.lock().unwrap().sessions.insert(session_id.clone(), session.clone());
        self.emit(LifecycleEventData::new(LifecycleEventKind::WorkspaceCreated, &session_id));

        Ok(session)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session, LifecycleError> {
        let mut inner = self.inner.lock().unwrap();
        let session = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| LifecycleError::SessionNotFound(session_id.to_string()))?;
        session.touch();
        Ok(session.clone())
    }

    pub fn list_sessions(&self) -> Vec<Session> {
        self.inner.lock().unwrap().sessions.values().cloned().collect()
    }

    pub fn suspend_workspace(&self, session_id: &str) -> Result<(), LifecycleError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| LifecycleError::SessionNotFound(session_id.to_string()))?;
            session.isolate.status = sbx_core::IsolateStatus::Suspended;
        }
        self.emit(LifecycleEventData::new(LifecycleEventKind::WorkspaceSuspended, session_id));
        Ok(())
    }

    pub fn resume_workspace(&self, session_id: &str) -> Result<(), LifecycleError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let session = inner
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| LifecycleError::SessionNotFound(session_id.to_string()))?;
            session.isolate.status = sbx_core::IsolateStatus::Active;
        }
        self.emit(LifecycleEventData::new(LifecycleEventKind::WorkspaceResumed, session_id));
        Ok(())
    }

    pub fn merge_workspace_changes(&self, session_id: &str, target: &Path) -> Result<bool, LifecycleError> {
        let session = self.get_session(session_id)?;
        let ok = self.builder.merge_back(&session.isolate, target);
        if ok {
            self.emit(LifecycleEventData::new(LifecycleEventKind::WorkspaceMerged, session_id));
        }
        Ok(ok)
    }

    pub fn destroy_workspace(&self, session_id: &str) -> Result<bool, LifecycleError> {
        self.emit(LifecycleEventData::new(LifecycleEventKind::CleanupStarted, session_id));

        let mut session = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .sessions
                .remove(session_id)
                .ok_or_else(|| LifecycleError::SessionNotFound(session_id.to_string()))?
        };

        let ok = self.builder.destroy(&mut session.isolate);
        self.emit(LifecycleEventData::new(LifecycleEventKind::WorkspaceDestroyed, session_id));
        self.emit(LifecycleEventData::new(LifecycleEventKind::SessionEnded, session_id));
        Ok(ok)
    }

    pub fn get_workspace_status(&self, session_id: &str) -> Result<WorkspaceStatus, LifecycleError> {
        let session = self.get_session(session_id)?;
        Ok(WorkspaceStatus {
            session_id: session.session_id,
            isolate_status: session.isolate.status,
            sandbox_path: session.isolate.sandbox_path.display().to_string(),
            created_at: session.created_at,
            last_accessed: session.last_accessed,
            access_count: session.access_count,
            metadata: session.metadata,
        })
    }

    /// Destroy every session whose idle time exceeds `session_timeout`.
    pub fn cleanup_expired_sessions(&self) -> u64 {
        let expired: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner
                .sessions
                .iter()
                .filter(|(_, s)| s.is_idle(self.session_timeout))
                .map(|(id, _)| id.clone())
                .collect()
        };
        let mut count = 0;
        for id in expired {
            if self.destroy_workspace(&id).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Destroy every remaining session, most-recently-created first.
    pub fn shutdown(&self) {
        let mut ids: Vec<(String, chrono::DateTime<chrono::Utc>)> = {
            let inner = self.inner.lock().unwrap();
            inner.sessions.iter().map(|(id, s)| (id.clone(), s.created_at)).collect()
        };
        ids.sort_by(|a, b| b.1.cmp(&a.1));
        for (id, _) in ids {
            let _ = self.destroy_workspace(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(root: &Path) -> LifecycleManager {
        LifecycleManager::new(root, sbx_core::SecurityPolicy::default(), 10, Duration::hours(1))
    }

    #[test]
    fn create_and_get_session_bumps_access_count() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"x").unwrap();
        let root = tempdir().unwrap();
        let mgr = manager(root.path());

        let session = mgr.create_workspace(source.path(), None, None, None).unwrap();
        let fetched = mgr.get_session(&session.session_id).unwrap();
        assert_eq!(fetched.access_count, 1);
    }

    #[test]
    fn duplicate_session_id_is_rejected() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"x").unwrap();
        let root = tempdir().unwrap();
        let mgr = manager(root.path());

        mgr.create_workspace(source.path(), Some("s1".into()), None, None).unwrap();
        let err = mgr.create_workspace(source.path(), Some("s1".into()), None, None).unwrap_err();
        assert!(matches!(err, LifecycleError::SessionExists(_)));
    }

    #[test]
    fn destroy_workspace_removes_session_and_sandbox() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"x").unwrap();
        let root = tempdir().unwrap();
        let mgr = manager(root.path());

        let session = mgr.create_workspace(source.path(), None, None, None).unwrap();
        let sandbox_path = session.isolate.sandbox_path.clone();
        assert!(mgr.destroy_workspace(&session.session_id).unwrap());
        assert!(!sandbox_path.exists());
        assert!(mgr.get_session(&session.session_id).is_err());
    }

    #[test]
    fn capacity_exceeded_when_at_max_concurrent() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"x").unwrap();
        let root = tempdir().unwrap();
        let mgr = LifecycleManager::new(root.path(), sbx_core::SecurityPolicy::default(), 1, Duration::hours(1));

        mgr.create_workspace(source.path(), Some("s1".into()), None, None).unwrap();
        let err = mgr.create_workspace(source.path(), Some("s2".into()), None, None).unwrap_err();
        assert!(matches!(err, LifecycleError::Core(CoreError::CapacityExceeded { .. })));
    }

    #[test]
    fn event_handlers_receive_lifecycle_events() {
        let source = tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), b"x").unwrap();
        let root = tempdir().unwrap();
        let mgr = manager(root.path());

        let events = std::sync::Arc::new(Mutex::new(Vec::new()));
        let events2 = events.clone();
        mgr.on_event(move |e| events2.lock().unwrap().push(e.event_kind));

        mgr.create_workspace(source.path(), None, None, None).unwrap();
        let recorded = events.lock().unwrap();
        assert!(recorded.contains(&LifecycleEventKind::SessionStarted));
        assert!(recorded.contains(&LifecycleEventKind::WorkspaceCreated));
    }
}
