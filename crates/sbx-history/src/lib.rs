//! History analyzer: derives verified outcomes from the action journal
//! and rolls them up into task and session execution summaries.

pub mod analyze;
pub mod derive;
pub mod error;
pub mod export;

pub use analyze::{HistoryAnalyzer, SessionExecutionHistory, TaskExecutionSummary, TaskStatus};
pub use derive::derive_outcome;
pub use error::HistoryError;
pub use export::{export_execution_history, ExportFormat};
