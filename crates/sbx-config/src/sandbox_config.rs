use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use sbx_core::{IsolationConfig, ResourceLimits, SecurityPolicy};
use serde::{Deserialize, Serialize};

fn default_session_timeout_s() -> u64 {
    3600
}

fn default_max_concurrent_workspaces() -> u32 {
    10
}

fn default_cache_budget_mb() -> u64 {
    512
}

fn default_monitor_interval_s() -> u64 {
    60
}

fn default_cleanup_interval_s() -> u64 {
    900
}

/// Top-level configuration document. Top-level keys mirror the Policy,
/// ResourceLimits, IsolationConfig, and manager-level options; anything
/// unrecognized lands in `custom_settings` rather than failing to parse,
/// matching the teacher's "unknown keys pass through" config convention.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub policy: SecurityPolicy,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
    #[serde(default)]
    pub isolation: IsolationConfig,

    #[serde(default = "default_session_timeout_s")]
    pub session_timeout_s: u64,
    #[serde(default = "default_max_concurrent_workspaces")]
    pub max_concurrent_workspaces: u32,
    #[serde(default = "default_cache_budget_mb")]
    pub cache_budget_mb: u64,
    #[serde(default = "default_monitor_interval_s")]
    pub monitor_interval_s: u64,
    #[serde(default = "default_cleanup_interval_s")]
    pub cleanup_interval_s: u64,

    #[serde(default, flatten)]
    pub custom_settings: HashMap<String, serde_json::Value>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            policy: SecurityPolicy::default(),
            resource_limits: ResourceLimits::default(),
            isolation: IsolationConfig::default(),
            session_timeout_s: default_session_timeout_s(),
            max_concurrent_workspaces: default_max_concurrent_workspaces(),
            cache_budget_mb: default_cache_budget_mb(),
            monitor_interval_s: default_monitor_interval_s(),
            cleanup_interval_s: default_cleanup_interval_s(),
            custom_settings: HashMap::new(),
        }
    }
}

impl SandboxConfig {
    /// Load from a TOML or JSON file, picked by extension; falls back to
    /// parsing as TOML and then JSON when the extension is absent or
    /// unrecognized. A missing file is not an error: callers get
    /// built-in defaults, matching the teacher's "no config file means
    /// built-in defaults" convention.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        let parsed = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse JSON config: {}", path.display()))?
        } else {
            toml::from_str(&content)
                .or_else(|_| serde_json::from_str(&content))
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        };
        Ok(parsed)
    }

    /// Validate numeric invariants; bails with a descriptive message on
    /// the first violation, matching the teacher's `validate_config`
    /// style of accumulating nothing and failing fast.
    pub fn validate(&self) -> Result<()> {
        if self.policy.max_execution_time_s == 0 {
            bail!("policy.max_execution_time_s must be > 0");
        }
        if self.session_timeout_s == 0 {
            bail!("session_timeout_s must be > 0");
        }
        if self.max_concurrent_workspaces == 0 {
            bail!("max_concurrent_workspaces must be > 0");
        }
        if self.resource_limits.max_memory_mb == 0 {
            bail!("resource_limits.max_memory_mb must be > 0");
        }
        if self.monitor_interval_s == 0 {
            bail!("monitor_interval_s must be > 0");
        }
        Ok(())
    }
}
