#[derive(thiserror::Error, Debug)]
pub enum IsolateError {
    #[error("source path does not exist: {0}")]
    SourceMissing(String),

    #[error("source path is not a directory: {0}")]
    SourceNotDirectory(String),

    #[error("clone failed: {0}")]
    CloneFailed(String),

    #[error("security setup rejected: {0}")]
    SecurityRejected(#[from] sbx_security::SecurityError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
