use std::collections::HashMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::analysis::{self, AnalysisCache};
use crate::error::CacheError;
use crate::operation::OperationCache;
use crate::plan_template::PlanTemplateCache;

pub use crate::operation::generate_cache_key;

#[derive(Clone, Debug, Serialize)]
pub struct CacheStats {
    pub analysis_entries: usize,
    pub operation_entries: usize,
    pub plan_template_entries: usize,
    pub total_bytes: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheHealth {
    pub stats: CacheStats,
    pub over_budget: bool,
    pub budget_bytes: u64,
}

/// Owns the three cache fabrics and enforces a shared memory budget
/// between them, draining the least valuable cache first when the
/// combined footprint grows past `max_bytes`.
pub struct CacheManager {
    pub analysis: AnalysisCache,
    pub operations: OperationCache,
    pub plan_templates: PlanTemplateCache,
    max_bytes: u64,
}

impl CacheManager {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self, CacheError> {
        let dir = dir.into();
        Ok(Self {
            analysis: AnalysisCache::new(dir.join("analysis"), 500)?,
            operations: OperationCache::new(dir.join("operations"), 2000)?,
            plan_templates: PlanTemplateCache::new(dir.join("plan_templates"), 200)?,
            max_bytes,
        })
    }

    pub fn workspace_hash(workspace_path: &std::path::Path) -> String {
        analysis::workspace_hash(workspace_path)
    }

    /// Invalidate every cached artifact derived from files under `workspace_prefix`.
    pub fn invalidate_workspace_caches(&mut self, workspace_prefix: &str) -> Result<u64, CacheError> {
        let mut removed = self.operations.invalidate_workspace(workspace_prefix)?;
        if self.analysis.invalidate(workspace_prefix)? {
            removed += 1;
        }
        Ok(removed)
    }

    pub fn cleanup_expired_entries(&mut self) -> Result<u64, CacheError> {
        let mut removed = self.analysis.cleanup_expired()?;
        removed += self.operations.cleanup_expired()?;
        removed += self.plan_templates.cleanup_poor_performers()?;
        Ok(removed)
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        CacheStats {
            analysis_entries: self.analysis.len(),
            operation_entries: self.operations.len(),
            plan_template_entries: self.plan_templates.len(),
            total_bytes: self.analysis.estimated_bytes()
                + self.operations.estimated_bytes()
                + self.plan_templates.estimated_bytes(),
        }
    }

    pub fn get_combined_stats(&self) -> HashMap<String, usize> {
        let mut m = HashMap::new();
        m.insert("analysis".to_string(), self.analysis.len());
        m.insert("operations".to_string(), self.operations.len());
        m.insert("plan_templates".to_string(), self.plan_templates.len());
        m
    }

    pub fn get_cache_health(&self) -> CacheHealth {
        let stats = self.get_cache_stats();
        let over_budget = stats.total_bytes > self.max_bytes;
        CacheHealth { stats, over_budget, budget_bytes: self.max_bytes }
    }

    /// Drain entries, cheapest value first, until back under budget:
    /// operation results, then analyses, then plan templates.
    pub fn enforce_memory_budget(&mut self) -> u64 {
        let mut evicted = 0;
        while self.get_cache_stats().total_bytes > self.max_bytes {
            if !self.operations.is_empty() {
                evicted += self.operations.evict_lru(1);
            } else if !self.analysis.is_empty() {
                evicted += self.analysis.evict_lru(1);
            } else if !self.plan_templates.is_empty() {
                evicted += self.plan_templates.evict_worst(1);
            } else {
                break;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, budget_bytes = self.max_bytes, "cache manager evicted entries over budget");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stats_reflect_inserted_entries() {
        let dir = tempdir().unwrap();
        let mut manager = CacheManager::new(dir.path(), 10_000_000).unwrap();
        manager
            .operations
            .cache_operation_result("k1", serde_json::json!({"ok": true}), vec![], None)
            .unwrap();
        let stats = manager.get_cache_stats();
        assert_eq!(stats.operation_entries, 1);
    }

    #[test]
    fn enforce_budget_evicts_until_under_limit() {
        let dir = tempdir().unwrap();
        let mut manager = CacheManager::new(dir.path(), 1).unwrap();
        manager
            .operations
            .cache_operation_result("k1", serde_json::json!({"big": "data"}), vec![], None)
            .unwrap();
        manager.enforce_memory_budget();
        assert!(manager.get_cache_stats().total_bytes <= 1 || manager.operations.is_empty());
    }
}
