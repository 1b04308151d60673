use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single point-in-time sample of host/isolate resource usage.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub cpu_percent: f32,
    pub open_files: u32,
    pub processes: u32,
    pub timestamp: DateTime<Utc>,
}

impl ResourceUsage {
    pub fn sample_now(memory_mb: u64, disk_mb: u64, cpu_percent: f32, open_files: u32, processes: u32) -> Self {
        Self {
            memory_mb,
            disk_mb,
            cpu_percent,
            open_files,
            processes,
            timestamp: Utc::now(),
        }
    }
}

/// Ceilings enforced by the resource governor and surfaced by the security
/// mediator's resource sub-mediator.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub max_memory_mb: u64,
    pub max_disk_mb: u64,
    pub max_cpu_percent: f32,
    pub max_open_files: u32,
    pub max_processes: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 2048,
            max_disk_mb: 4096,
            max_cpu_percent: 80.0,
            max_open_files: 256,
            max_processes: 32,
        }
    }
}

impl ResourceLimits {
    /// Returns the limits this usage violates, empty if within bounds.
    pub fn violations(&self, usage: &ResourceUsage) -> Vec<String> {
        let mut v = Vec::new();
        if usage.memory_mb > self.max_memory_mb {
            v.push(format!("memory {} MB > limit {} MB", usage.memory_mb, self.max_memory_mb));
        }
        if usage.disk_mb > self.max_disk_mb {
            v.push(format!("disk {} MB > limit {} MB", usage.disk_mb, self.max_disk_mb));
        }
        if usage.cpu_percent > self.max_cpu_percent {
            v.push(format!("cpu {:.1}% > limit {:.1}%", usage.cpu_percent, self.max_cpu_percent));
        }
        if usage.open_files > self.max_open_files {
            v.push(format!("open files {} > limit {}", usage.open_files, self.max_open_files));
        }
        if usage.processes > self.max_processes {
            v.push(format!("processes {} > limit {}", usage.processes, self.max_processes));
        }
        v
    }

    pub fn is_within_limits(&self, usage: &ResourceUsage) -> bool {
        self.violations(usage).is_empty()
    }
}
