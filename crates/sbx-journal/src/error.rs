#[derive(thiserror::Error, Debug)]
pub enum JournalError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("clear_logs requires session_id or before_ts; refusing to wipe the whole journal")]
    RetentionScopeRequired,

    #[error("unsupported export format '{0}'")]
    UnsupportedFormat(String),
}
