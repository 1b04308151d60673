#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("session '{0}' already exists")]
    SessionExists(String),

    #[error("session '{0}' not found")]
    SessionNotFound(String),

    #[error(transparent)]
    Core(#[from] sbx_core::CoreError),

    #[error(transparent)]
    Isolate(#[from] sbx_isolate::IsolateError),
}
