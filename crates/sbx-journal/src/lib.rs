//! Indexed append-only action journal backed by SQLite.

pub mod error;
pub mod export;
pub mod query;
pub mod store;

pub use error::JournalError;
pub use export::{export, ExportFormat};
pub use query::{Query, Summary};
pub use store::Journal;
