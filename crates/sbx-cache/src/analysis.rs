use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::CacheHeader;
use crate::error::CacheError;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AnalysisEntry {
    header: CacheHeader,
    analysis: serde_json::Value,
    file_timestamps: HashMap<String, DateTime<Utc>>,
    analysis_version: String,
}

impl AnalysisEntry {
    fn is_valid_for(&self, current_timestamps: &HashMap<String, DateTime<Utc>>) -> bool {
        if self.header.is_expired() {
            return false;
        }
        for (path, cached_ts) in &self.file_timestamps {
            match current_timestamps.get(path) {
                Some(current_ts) if current_ts <= cached_ts => {}
                _ => return false,
            }
        }
        true
    }
}

/// Cache of codebase analysis artifacts keyed by workspace hash, valid as
/// long as no tracked file's mtime has advanced past what was recorded.
pub struct AnalysisCache {
    dir: PathBuf,
    max_entries: usize,
    entries: HashMap<String, AnalysisEntry>,
}

impl AnalysisCache {
    pub fn new(dir: impl Into<PathBuf>, max_entries: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut cache = Self { dir, max_entries, entries: HashMap::new() };
        cache.load_index()?;
        Ok(cache)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("analysis_index.json")
    }

    fn load_index(&mut self) -> Result<(), CacheError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(path)?;
        self.entries = serde_json::from_str(&raw)
            .map_err(|e| CacheError::IndexCorrupt(e.to_string()))?;
        Ok(())
    }

    fn persist_index(&self) -> Result<(), CacheError> {
        let raw = serde_json::to_string_pretty(&self.entries).unwrap_or_default();
        fs::write(self.index_path(), raw)?;
        Ok(())
    }

    pub fn cache_analysis(
        &mut self,
        workspace_hash: &str,
        analysis: serde_json::Value,
        file_timestamps: HashMap<String, DateTime<Utc>>,
        ttl: Option<chrono::Duration>,
    ) -> Result<(), CacheError> {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(workspace_hash) {
            self.evict_lru(1);
        }
        self.entries.insert(
            workspace_hash.to_string(),
            AnalysisEntry {
                header: CacheHeader::new(workspace_hash, ttl),
                analysis,
                file_timestamps,
                analysis_version: "1.0".to_string(),
            },
        );
        self.persist_index()
    }

    pub fn get_analysis(&mut self, workspace_hash: &str) -> Option<serde_json::Value> {
        let expired = self.entries.get(workspace_hash).is_some_and(|e| e.header.is_expired());
        if expired {
            self.entries.remove(workspace_hash);
            let _ = self.persist_index();
            return None;
        }
        if let Some(entry) = self.entries.get_mut(workspace_hash) {
            entry.header.touch();
            Some(entry.analysis.clone())
        } else {
            None
        }
    }

    pub fn is_analysis_valid(
        &mut self,
        workspace_hash: &str,
        current_timestamps: &HashMap<String, DateTime<Utc>>,
    ) -> bool {
        let valid = self
            .entries
            .get(workspace_hash)
            .is_some_and(|e| e.is_valid_for(current_timestamps));
        if !valid {
            self.entries.remove(workspace_hash);
            let _ = self.persist_index();
        }
        valid
    }

    pub fn invalidate(&mut self, workspace_hash: &str) -> Result<bool, CacheError> {
        let removed = self.entries.remove(workspace_hash).is_some();
        if removed {
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

    /// Rough in-memory footprint, used by the shared memory budget.
    pub fn estimated_bytes(&self) -> u64 {
        self.entries
            .values()
            .map(|e| serde_json::to_string(e).map(|s| s.len() as u64).unwrap_or(0))
            .sum()
    }
}

/// SHA-256 of the workspace path, used as the cache key.
pub fn workspace_hash(workspace_path: &Path) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(workspace_path.to_string_lossy().as_bytes());
    data_encoding_hex(&hasher.finalize())
}

fn data_encoding_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cache_hit_then_invalidate_by_newer_mtime() {
        let dir = tempdir().unwrap();
        let mut cache = AnalysisCache::new(dir.path(), 10).unwrap();
        let hash = "h1";
        let t0 = Utc::now();
        let mut ts = HashMap::new();
        ts.insert("a.py".to_string(), t0);
        cache
            .cache_analysis(hash, serde_json::json!({"languages": ["python"]}), ts.clone(), None)
            .unwrap();

        assert!(cache.get_analysis(hash).is_some());

        let mut newer = HashMap::new();
        newer.insert("a.py".to_string(), t0 + chrono::Duration::seconds(5));
        assert!(!cache.is_analysis_valid(hash, &newer));
        assert!(cache.get_analysis(hash).is_none());
    }

    #[test]
    fn lru_eviction_removes_oldest_access() {
        let dir = tempdir().unwrap();
        let mut cache = AnalysisCache::new(dir.path(), 10).unwrap();
        cache.cache_analysis("a", serde_json::json!({}), HashMap::new(), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.cache_analysis("b", serde_json::json!({}), HashMap::new(), None).unwrap();
        cache.get_analysis("b");
        let evicted = cache.evict_lru(1);
        assert_eq!(evicted, 1);
        assert!(cache.get_analysis("b").is_some());
    }
}
