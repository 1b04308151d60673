#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    #[error("journal error: {0}")]
    Journal(#[from] sbx_journal::JournalError),

    #[error("unsupported export format '{0}'")]
    UnsupportedFormat(String),

    #[error("task '{0}' has no recorded actions")]
    TaskNotFound(String),
}
