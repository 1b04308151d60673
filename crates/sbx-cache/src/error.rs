#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache index corrupt: {0}")]
    IndexCorrupt(String),
}
