use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::entry::CacheHeader;
use crate::error::CacheError;

const NON_CACHEABLE_VERBS: &[&str] = &["write", "delete", "move", "rename", "execute", "run", "install", "clean"];
const CACHEABLE_VERBS: &[&str] = &["read", "list", "analyze", "search", "lint", "check", "status", "diff"];

/// Only read-only, idempotent operations are worth caching; anything that
/// mutates the workspace must always re-run.
pub fn is_operation_cacheable(verb: &str) -> bool {
    let verb = verb.to_ascii_lowercase();
    if NON_CACHEABLE_VERBS.contains(&verb.as_str()) {
        return false;
    }
    CACHEABLE_VERBS.contains(&verb.as_str())
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct OperationEntry {
    header: CacheHeader,
    result: serde_json::Value,
    dependent_files: Vec<String>,
}

/// Cache of read-only operation results, invalidated by the set of files
/// they were computed from.
pub struct OperationCache {
    dir: PathBuf,
    max_entries: usize,
    entries: HashMap<String, OperationEntry>,
}

impl OperationCache {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut cache = Self { dir, max_entries, entries: HashMap::new() };
        cache.load_index()?;
        Ok(cache)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("operation_index.json")
    }

    fn load_index(&mut self) -> Result<(), CacheError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(path)?;
        self.entries = serde_json::from_str(&raw).map_err(|e| CacheError::IndexCorrupt(e.to_string()))?;
        Ok(())
    }

    fn persist_index(&self) -> Result<(), CacheError> {
        fs::write(self.index_path(), serde_json::to_string_pretty(&self.entries).unwrap_or_default())?;
        Ok(())
    }

    pub fn cache_operation_result(
        &mut self,
        operation_key: &str,
        result: serde_json::Value,
        dependent_files: Vec<String>,
        ttl: Option<chrono::Duration>,
    ) -> Result<(), CacheError> {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(operation_key) {
            self.evict_lru(1);
        }
        self.entries.insert(
            operation_key.to_string(),
            OperationEntry { header: CacheHeader::new(operation_key, ttl), result, dependent_files },
        );
        self.persist_index()
    }

    pub fn get_operation_result(&mut self, operation_key: &str) -> Option<serde_json::Value> {
        let expired = self.entries.get(operation_key).is_some_and(|e| e.header.is_expired());
        if expired {
            self.entries.remove(operation_key);
            let _ = self.persist_index();
            return None;
        }
        if let Some(entry) = self.entries.get_mut(operation_key) {
            entry.header.touch();
            Some(entry.result.clone())
        } else {
            None
        }
    }

    /// Drop every cached result whose dependent_files intersects `changed_files`.
    pub fn invalidate_related_results(&mut self, changed_files: &[String]) -> Result<u64, CacheError> {
        let changed: HashSet<&String> = changed_files.iter().collect();
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !e.dependent_files.iter().any(|f| changed.contains(f)));
        let removed = (before - self.entries.len()) as u64;
        if removed > 0 {
            self.persist_index()?;
        }
        Ok(removed)
    }

    pub fn invalidate_workspace(&mut self, workspace_prefix: &str) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| !e.dependent_files.iter().any(|f| f.starts_with(workspace_prefix)));
        let removed = (before - self.entries.len()) as u64;
        if removed > 0 {
            self.persist_index()?;
        }
        Ok(removed)
    }

    pub fn cleanup_expired(&mut self) -> Result<u64, CacheError> {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.header.is_expired());
        let removed = (before - self.entries.len()) as u64;
        if removed > 0 {
            self.persist_index()?;
        }
        Ok(removed)
    }

    pub fn evict_lru(&mut self, count: usize) -> u64 {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort_by_key(|k| self.entries[k].header.last_accessed);
        let mut evicted = 0;
        for key in keys.into_iter().take(count) {
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        self.persist_index()
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.entries
            .values()
            .map(|e| serde_json::to_string(e).map(|s| s.len() as u64).unwrap_or(0))
            .sum()
    }
}

/// Stable cache key derived from an operation name plus its arguments.
pub fn generate_cache_key(operation: &str, args: &[String], kwargs: &HashMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    for a in args {
        hasher.update(b"\0");
        hasher.update(a.as_bytes());
    }
    let mut keys: Vec<&String> = kwargs.keys().collect();
    keys.sort();
    for k in keys {
        hasher.update(b"\0");
        hasher.update(k.as_bytes());
        hasher.update(b"=");
        hasher.update(kwargs[k].as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[allow(dead_code)]
fn _unused_timestamp_anchor() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mutating_verbs_are_not_cacheable() {
        assert!(!is_operation_cacheable("write"));
        assert!(!is_operation_cacheable("delete"));
        assert!(is_operation_cacheable("read"));
        assert!(is_operation_cacheable("analyze"));
    }

    #[test]
    fn cache_key_is_stable_and_order_independent() {
        let mut kwargs_a = HashMap::new();
        kwargs_a.insert("x".to_string(), "1".to_string());
        kwargs_a.insert("y".to_string(), "2".to_string());
        let mut kwargs_b = HashMap::new();
        kwargs_b.insert("y".to_string(), "2".to_string());
        kwargs_b.insert("x".to_string(), "1".to_string());

        let k1 = generate_cache_key("analyze", &["a.rs".to_string()], &kwargs_a);
        let k2 = generate_cache_key("analyze", &["a.rs".to_string()], &kwargs_b);
        assert_eq!(k1, k2);
    }

    #[test]
    fn invalidate_related_results_drops_dependent_entries() {
        let dir = tempdir().unwrap();
        let mut cache = OperationCache::new(dir.path(), 10).unwrap();
        cache
            .cache_operation_result("k1", serde_json::json!({"ok": true}), vec!["a.rs".to_string()], None)
            .unwrap();
        let removed = cache.invalidate_related_results(&["a.rs".to_string()]).unwrap();
        assert_eq!(removed, 1);
        assert!(cache.get_operation_result("k1").is_none());
    }
}
