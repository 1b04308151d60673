#[derive(thiserror::Error, Debug)]
pub enum SandboxError {
    #[error(transparent)]
    Core(#[from] sbx_core::CoreError),

    #[error(transparent)]
    Security(#[from] sbx_security::SecurityError),

    #[error(transparent)]
    Journal(#[from] sbx_journal::JournalError),

    #[error(transparent)]
    Cache(#[from] sbx_cache::CacheError),

    #[error(transparent)]
    Isolate(#[from] sbx_isolate::IsolateError),

    #[error(transparent)]
    Lifecycle(#[from] sbx_lifecycle::LifecycleError),

    #[error(transparent)]
    History(#[from] sbx_history::HistoryError),

    #[error(transparent)]
    Toolchain(#[from] sbx_toolchain::ToolchainError),

    #[error("operation denied by security policy: {0}")]
    Denied(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
