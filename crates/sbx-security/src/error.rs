#[derive(thiserror::Error, Debug)]
pub enum SecurityError {
    #[error("path outside sandbox: {0}")]
    PathEscape(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
