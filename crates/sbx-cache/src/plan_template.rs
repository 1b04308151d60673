use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskPlanTemplate {
    pub template_key: String,
    pub plan: serde_json::Value,
    pub project_characteristics: HashMap<String, String>,
    pub usage_count: u64,
    pub success_count: u64,
    pub similarity_threshold: f64,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

impl TaskPlanTemplate {
    pub fn success_rate(&self) -> f64 {
        if self.usage_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.usage_count as f64
        }
    }

    /// Fraction of `other`'s keys that match this template's recorded
    /// characteristics, 0.0 if there is no overlap at all.
    pub fn similarity(&self, other: &HashMap<String, String>) -> f64 {
        let common: Vec<&String> = self
            .project_characteristics
            .keys()
            .filter(|k| other.contains_key(*k))
            .collect();
        if common.is_empty() {
            return 0.0;
        }
        let matches = common
            .iter()
            .filter(|k| self.project_characteristics[**k] == other[**k])
            .count();
        matches as f64 / common.len() as f64
    }
}

/// Cache of reusable task-plan templates, matched to new projects by
/// characteristic similarity rather than an exact key.
pub struct PlanTemplateCache {
    dir: PathBuf,
    max_templates: usize,
    templates: HashMap<String, TaskPlanTemplate>,
}

impl PlanTemplateCache {
    pub fn new(dir: impl Into<PathBuf>, max_templates: usize) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut cache = Self { dir, max_templates, templates: HashMap::new() };
        cache.load_index()?;
        Ok(cache)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("plan_template_index.json")
    }

    fn load_index(&mut self) -> Result<(), CacheError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(());
        }
        let raw = fs::read_to_string(path)?;
        self.templates = serde_json::from_str(&raw).map_err(|e| CacheError::IndexCorrupt(e.to_string()))?;
        Ok(())
    }

    fn persist_index(&self) -> Result<(), CacheError> {
        fs::write(self.index_path(), serde_json::to_string_pretty(&self.templates).unwrap_or_default())?;
        Ok(())
    }

    pub fn cache_plan_template(
        &mut self,
        template_key: &str,
        plan: serde_json::Value,
        project_characteristics: HashMap<String, String>,
        similarity_threshold: f64,
    ) -> Result<(), CacheError> {
        if self.templates.len() >= self.max_templates && !self.templates.contains_key(template_key) {
            self.evict_worst(1);
        }
        self.templates.insert(
            template_key.to_string(),
            TaskPlanTemplate {
                template_key: template_key.to_string(),
                plan,
                project_characteristics,
                usage_count: 0,
                success_count: 0,
                similarity_threshold,
                created_at: Utc::now(),
                last_used: None,
            },
        );
        self.persist_index()
    }

    pub fn get_plan_template(&self, template_key: &str) -> Option<&TaskPlanTemplate> {
        self.templates.get(template_key)
    }

    pub fn find_similar_templates(
        &self,
        characteristics: &HashMap<String, String>,
        max_results: usize,
    ) -> Vec<(String, TaskPlanTemplate, f64)> {
        let mut candidates: Vec<(String, TaskPlanTemplate, f64)> = self
            .templates
            .values()
            .filter_map(|t| {
                let sim = t.similarity(characteristics);
                (sim >= t.similarity_threshold).then(|| (t.template_key.clone(), t.clone(), sim))
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap()
                .then(b.1.success_rate().partial_cmp(&a.1.success_rate()).unwrap())
        });
        candidates.truncate(max_results);
        candidates
    }

    pub fn update_template_usage(&mut self, template_key: &str, success: bool) -> Result<bool, CacheError> {
        let Some(template) = self.templates.get_mut(template_key) else {
            return Ok(false);
        };
        template.usage_count += 1;
        if success {
            template.success_count += 1;
        }
        template.last_used = Some(Utc::now());
        self.persist_index()?;
        Ok(true)
    }

    /// Remove templates with enough history to trust and a poor success
    /// rate (>= 5 uses, < 20% success).
    pub fn cleanup_poor_performers(&mut self) -> Result<u64, CacheError> {
        let before = self.templates.len();
        self.templates
            .retain(|_, t| !(t.usage_count >= 5 && t.success_rate() < 0.2));
        let removed = (before - self.templates.len()) as u64;
        if removed > 0 {
            self.persist_index()?;
        }
        Ok(removed)
    }

    pub fn evict_worst(&mut self, count: usize) -> u64 {
        let mut keys: Vec<String> = self.templates.keys().cloned().collect();
        keys.sort_by(|a, b| {
            let ta = &self.templates[a];
            let tb = &self.templates[b];
            (ta.success_rate(), ta.usage_count, ta.last_used)
                .partial_cmp(&(tb.success_rate(), tb.usage_count, tb.last_used))
                .unwrap()
        });
        let mut evicted = 0;
        for key in keys.into_iter().take(count) {
            self.templates.remove(&key);
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.templates.clear();
        self.persist_index()
    }

    pub fn estimated_bytes(&self) -> u64 {
        self.templates
            .values()
            .map(|t| serde_json::to_string(t).map(|s| s.len() as u64).unwrap_or(0))
            .sum()
    }
}
