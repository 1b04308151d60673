#[derive(thiserror::Error, Debug)]
pub enum ToolchainError {
    #[error("command '{0}' rejected by security policy")]
    CommandDenied(String),

    #[error("no command mapping for verb '{0}' under build system '{1}'")]
    UnsupportedVerb(String, String),

    #[error("journal error: {0}")]
    Journal(#[from] sbx_journal::JournalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
