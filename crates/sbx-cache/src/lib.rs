pub mod analysis;
pub mod entry;
pub mod error;
pub mod manager;
pub mod operation;
pub mod plan_template;

pub use analysis::{workspace_hash, AnalysisCache};
pub use entry::CacheHeader;
pub use error::CacheError;
pub use manager::{generate_cache_key, CacheHealth, CacheManager, CacheStats};
pub use operation::{is_operation_cacheable, OperationCache};
pub use plan_template::{PlanTemplateCache, TaskPlanTemplate};
