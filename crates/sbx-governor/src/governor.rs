use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sbx_cache::CacheManager;
use sbx_core::{Isolate, ResourceLimits, ResourceUsage, SecurityPolicy};
use sbx_security::resource::ResourceBackend;
use sysinfo::{Disks, System};

use crate::rlimit::apply_rlimits;
use crate::sandbox::{detect_sandbox_capability, SandboxCapability};

const RING_BUFFER_CAP: usize = 1440;
const STALE_SANDBOX_AGE_HOURS: i64 = 24;
const LARGE_LOG_BYTES: u64 = 100 * 1024 * 1024;
const TEMP_FILE_NAMES: &[&str] = &["__pycache__", ".pytest_cache"];
const TEMP_FILE_EXTENSIONS: &[&str] = &["pyc", "tmp", "temp"];

/// Shared stop signal for the governor's background worker threads. A
/// condition-variable wait is interrupted as soon as
/// [`ShutdownSignal::signal`] is called, rather than waiting out the
/// remainder of the sleep interval.
#[derive(Clone)]
pub struct ShutdownSignal(Arc<(Mutex<bool>, Condvar)>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self(Arc::new((Mutex::new(false), Condvar::new())))
    }

    pub fn signal(&self) {
        let (lock, cvar) = &*self.0;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn is_signaled(&self) -> bool {
        *self.0 .0.lock().unwrap()
    }

    /// Sleep for up to `timeout`, waking early if shutdown is signaled.
    /// Returns true if shutdown was (or became) signaled.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.0;
        let guard = lock.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, _) = cvar.wait_timeout(guard, timeout).unwrap();
        *guard
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A periodic reclamation task. `cleanup_fn` returns the number of items
/// it reclaimed; an `Err` is logged and treated as zero reclaimed.
pub struct CleanupTask {
    pub name: String,
    pub description: String,
    pub priority: u8,
    pub max_age_hours: i64,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub total_cleanups: u64,
    cleanup_fn: Box<dyn Fn() -> Result<u64> + Send + Sync>,
}

impl CleanupTask {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        priority: u8,
        max_age_hours: i64,
        cleanup_fn: impl Fn() -> Result<u64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            priority,
            max_age_hours,
            enabled: true,
            last_run: None,
            total_cleanups: 0,
            cleanup_fn: Box::new(cleanup_fn),
        }
    }

    pub fn should_run(&self, force: bool) -> bool {
        if force {
            return self.enabled;
        }
        if !self.enabled {
            return false;
        }
        match self.last_run {
            None => true,
            Some(last) => Utc::now() - last > chrono::Duration::hours(self.max_age_hours),
        }
    }

    fn run(&mut self) -> u64 {
        let reclaimed = match (self.cleanup_fn)() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(task = %self.name, error = %e, "cleanup task failed");
                0
            }
        };
        self.last_run = Some(Utc::now());
        self.total_cleanups += reclaimed;
        reclaimed
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResourceStatistics {
    pub memory_min_mb: u64,
    pub memory_avg_mb: u64,
    pub memory_max_mb: u64,
    pub memory_p95_mb: u64,
    pub disk_min_mb: u64,
    pub disk_avg_mb: u64,
    pub disk_max_mb: u64,
    pub cpu_min_percent: f32,
    pub cpu_avg_percent: f32,
    pub cpu_max_percent: f32,
    pub cpu_p95_percent: f32,
    pub sample_count: usize,
}

/// Nearest-rank P95 over a sorted-in-place copy of `samples`.
fn p95<T: PartialOrd + Copy>(samples: &mut [T]) -> T {
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((samples.len() as f64 * 0.95).ceil() as usize).saturating_sub(1).min(samples.len() - 1);
    samples[idx]
}

type ViolationCallback = Box<dyn Fn(&ResourceUsage, &[String]) + Send + Sync>;

/// Mutable state behind a single lock, so [`ResourceGovernor`]'s methods
/// can all take `&self` and be driven concurrently from worker threads
/// while still being shared as an `Arc` backend with the lifecycle table.
struct Inner {
    history: VecDeque<ResourceUsage>,
    tasks: Vec<CleanupTask>,
    violation_callbacks: Vec<ViolationCallback>,
}

/// Samples host usage on a fixed schedule and runs periodic reclamation
/// tasks. Also implements [`ResourceBackend`] so the security mediator can
/// route resource enforcement through whichever isolation mechanism this
/// host supports (cgroup v2, `setrlimit`, or no-op).
pub struct ResourceGovernor {
    limits: ResourceLimits,
    inner: Mutex<Inner>,
    sys: Mutex<System>,
    persist_path: Option<PathBuf>,
}

impl ResourceGovernor {
    /// `manager_root` is where isolate sandbox directories live (for the
    /// `old_sandbox_environments`/`large_log_files`/`temporary_files` tasks);
    /// `cache` is the shared cache fabric the two cache-related tasks drain.
    pub fn new(limits: ResourceLimits, manager_root: impl Into<PathBuf>, cache: Arc<Mutex<CacheManager>>) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner {
                history: VecDeque::with_capacity(RING_BUFFER_CAP),
                tasks: default_cleanup_tasks(manager_root.into(), cache),
                violation_callbacks: Vec::new(),
            }),
            sys: Mutex::new(System::new_all()),
            persist_path: None,
        }
    }

    /// Load any previously-persisted ring buffer from `path` and remember
    /// it as the save target for future samples, matching the teacher's
    /// usage-stats load-on-construct / save-per-record convention.
    pub fn with_persistence(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Ok(content) = std::fs::read_to_string(&path) {
            if let Ok(samples) = toml::from_str::<Vec<ResourceUsage>>(&content) {
                self.inner.lock().unwrap().history = samples.into_iter().collect();
            }
        }
        Self { persist_path: Some(path), ..self }
    }

    fn persist_history(&self, inner: &Inner) {
        let Some(path) = &self.persist_path else { return };
        let samples: Vec<&ResourceUsage> = inner.history.iter().collect();
        let Ok(content) = toml::to_string_pretty(&samples) else { return };
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(path, content) {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist resource governor history");
        }
    }

    pub fn register_task(&self, task: CleanupTask) {
        self.inner.lock().unwrap().tasks.push(task);
    }

    pub fn on_violation(&self, callback: impl Fn(&ResourceUsage, &[String]) + Send + Sync + 'static) {
        self.inner.lock().unwrap().violation_callbacks.push(Box::new(callback));
    }

    /// Sample global host usage, record it, and react to any breach.
    pub fn run_monitor_once(&self) -> ResourceUsage {
        let usage = self.sample_global_usage();

        let violations = self.limits.violations(&usage);
        let trending = {
            let mut inner = self.inner.lock().unwrap();
            if inner.history.len() >= RING_BUFFER_CAP {
                inner.history.pop_front();
            }
            inner.history.push_back(usage.clone());
            self.persist_history(&inner);
            !violations.is_empty() || trending_toward_breach(&self.limits, &inner.history)
        };

        if !violations.is_empty() {
            tracing::warn!(?violations, "resource governor detected a limit breach");
            self.run_cleanup_priority_at_most(2);
            let inner = self.inner.lock().unwrap();
            for cb in &inner.violation_callbacks {
                cb(&usage, &violations);
            }
        } else if trending {
            tracing::warn!("resource governor P95 trend crossed emergency cleanup threshold");
            self.run_cleanup_priority_at_most(2);
        }

        usage
    }

    /// Run the monitor loop on the calling thread until `shutdown` fires.
    /// Intended to be driven from a dedicated worker thread.
    pub fn run_monitor_loop(&self, interval: Duration, shutdown: &ShutdownSignal) {
        while !shutdown.wait_timeout(interval) {
            self.run_monitor_once();
        }
    }

    fn sample_global_usage(&self) -> ResourceUsage {
        let mut sys = self.sys.lock().unwrap();
        sys.refresh_memory();
        sys.refresh_cpu_usage();
        sys.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

        let memory_mb = sys.used_memory() / 1024 / 1024;
        let cpu_percent = sys.global_cpu_usage();
        let processes = sys.processes().len() as u32;

        let disk_mb = Disks::new_with_refreshed_list()
            .iter()
            .map(|d| (d.total_space() - d.available_space()) / 1024 / 1024)
            .sum();

        ResourceUsage::sample_now(memory_mb, disk_mb, cpu_percent, 0, processes)
    }

    /// Run every enabled task in ascending priority order whose
    /// `should_run` predicate is true.
    pub fn run_cleanup_once(&self, force: bool) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.tasks.sort_by_key(|t| t.priority);
        let mut reclaimed = 0;
        for task in &mut inner.tasks {
            if task.should_run(force) {
                reclaimed += task.run();
            }
        }
        reclaimed
    }

    fn run_cleanup_priority_at_most(&self, max_priority: u8) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.tasks.sort_by_key(|t| t.priority);
        let mut reclaimed = 0;
        for task in &mut inner.tasks {
            if task.priority <= max_priority && task.enabled {
                reclaimed += task.run();
            }
        }
        reclaimed
    }

    /// Run the cleanup loop on the calling thread until `shutdown` fires.
    /// Intended to be driven from a dedicated worker thread.
    pub fn run_cleanup_loop(&self, interval: Duration, shutdown: &ShutdownSignal) {
        while !shutdown.wait_timeout(interval) {
            self.run_cleanup_once(false);
        }
    }

    pub fn get_resource_statistics(&self) -> ResourceStatistics {
        let inner = self.inner.lock().unwrap();
        if inner.history.is_empty() {
            return ResourceStatistics::default();
        }
        let mut mem: Vec<u64> = inner.history.iter().map(|u| u.memory_mb).collect();
        let disk: Vec<u64> = inner.history.iter().map(|u| u.disk_mb).collect();
        let mut cpu: Vec<f32> = inner.history.iter().map(|u| u.cpu_percent).collect();

        ResourceStatistics {
            memory_min_mb: *mem.iter().min().unwrap(),
            memory_avg_mb: mem.iter().sum::<u64>() / mem.len() as u64,
            memory_max_mb: *mem.iter().max().unwrap(),
            memory_p95_mb: p95(&mut mem),
            disk_min_mb: *disk.iter().min().unwrap(),
            disk_avg_mb: disk.iter().sum::<u64>() / disk.len() as u64,
            disk_max_mb: *disk.iter().max().unwrap(),
            cpu_min_percent: cpu.iter().cloned().fold(f32::MAX, f32::min),
            cpu_avg_percent: cpu.iter().sum::<f32>() / cpu.len() as f32,
            cpu_max_percent: cpu.iter().cloned().fold(f32::MIN, f32::max),
            cpu_p95_percent: p95(&mut cpu),
            sample_count: inner.history.len(),
        }
    }
}

/// True once the P95 trend over recorded history crosses 90% of a limit,
/// ahead of any single sample actually breaching it — an early-warning
/// signal distinct from [`ResourceLimits::violations`]'s per-sample hard
/// check.
fn trending_toward_breach(limits: &ResourceLimits, history: &VecDeque<ResourceUsage>) -> bool {
    if history.len() < 10 {
        return false;
    }
    let mut mem: Vec<u64> = history.iter().map(|u| u.memory_mb).collect();
    let mut cpu: Vec<f32> = history.iter().map(|u| u.cpu_percent).collect();
    let memory_p95_mb = p95(&mut mem);
    let cpu_p95_percent = p95(&mut cpu);
    memory_p95_mb as f64 > limits.max_memory_mb as f64 * 0.9
        || cpu_p95_percent as f64 > limits.max_cpu_percent as f64 * 0.9
}

impl ResourceBackend for ResourceGovernor {
    fn apply_resource_limits(&self, isolate: &Isolate, policy: &SecurityPolicy) -> Result<()> {
        match detect_sandbox_capability() {
            SandboxCapability::Setrlimit => apply_rlimits(policy.max_memory_mb, None),
            SandboxCapability::CgroupV2 | SandboxCapability::None => {
                tracing::debug!(isolate_id = %isolate.id, "no rlimit enforcement applied for this capability");
                Ok(())
            }
        }
    }

    fn monitor_resource_usage(&self, isolate: &Isolate) -> Result<ResourceUsage> {
        let global = self.sample_global_usage();
        let disk_mb = directory_size_mb(&isolate.sandbox_path);
        Ok(ResourceUsage::sample_now(
            global.memory_mb,
            disk_mb,
            global.cpu_percent,
            0,
            global.processes,
        ))
    }
}

fn directory_size_mb(path: &Path) -> u64 {
    fn walk(path: &Path) -> u64 {
        let Ok(entries) = std::fs::read_dir(path) else { return 0 };
        entries
            .flatten()
            .map(|entry| {
                let Ok(meta) = entry.metadata() else { return 0 };
                if meta.is_dir() {
                    walk(&entry.path())
                } else {
                    meta.len()
                }
            })
            .sum()
    }
    walk(path) / 1024 / 1024
}

fn older_than(meta: &std::fs::Metadata, max_age_hours: i64) -> bool {
    let Ok(modified) = meta.modified() else { return false };
    let Ok(age) = modified.elapsed() else { return false };
    age > Duration::from_secs((max_age_hours.max(0) as u64) * 3600)
}

/// Remove `workspace_*` sandbox directories under `manager_root` whose
/// mtime is older than [`STALE_SANDBOX_AGE_HOURS`].
fn remove_stale_sandboxes(manager_root: &Path) -> Result<u64> {
    let Ok(entries) = std::fs::read_dir(manager_root) else { return Ok(0) };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_dir() {
            continue;
        }
        if !path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("workspace_")) {
            continue;
        }
        if older_than(&meta, STALE_SANDBOX_AGE_HOURS) {
            std::fs::remove_dir_all(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Truncate `.log`/`.out`/`.err` files under `manager_root` past
/// [`LARGE_LOG_BYTES`], keeping the file but discarding its contents —
/// the cheapest rotation that does not disturb open file handles.
fn rotate_large_logs(manager_root: &Path) -> Result<u64> {
    fn walk(path: &Path, rotated: &mut u64) -> Result<()> {
        let Ok(entries) = std::fs::read_dir(path) else { return Ok(()) };
        for entry in entries.flatten() {
            let p = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_dir() {
                walk(&p, rotated)?;
                continue;
            }
            let is_log = p
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| matches!(e, "log" | "out" | "err"));
            if is_log && meta.len() > LARGE_LOG_BYTES {
                std::fs::write(&p, [])?;
                *rotated += 1;
            }
        }
        Ok(())
    }
    let mut rotated = 0;
    walk(manager_root, &mut rotated)?;
    Ok(rotated)
}

/// Remove language-cache directories and temp files under `manager_root`:
/// `__pycache__`, `.pytest_cache`, and any `*.pyc`/`*.tmp`/`*.temp` file.
fn remove_temp_files(manager_root: &Path) -> Result<u64> {
    fn walk(path: &Path, removed: &mut u64) -> Result<()> {
        let Ok(entries) = std::fs::read_dir(path) else { return Ok(()) };
        for entry in entries.flatten() {
            let p = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");

            if meta.is_dir() {
                if TEMP_FILE_NAMES.contains(&name) {
                    std::fs::remove_dir_all(&p)?;
                    *removed += 1;
                    continue;
                }
                walk(&p, removed)?;
                continue;
            }

            let is_temp_ext = p.extension().and_then(|e| e.to_str()).is_some_and(|e| TEMP_FILE_EXTENSIONS.contains(&e));
            if is_temp_ext {
                std::fs::remove_file(&p)?;
                *removed += 1;
            }
        }
        Ok(())
    }
    let mut removed = 0;
    walk(manager_root, &mut removed)?;
    Ok(removed)
}

/// The five baseline reclamation tasks run by every governor instance.
fn default_cleanup_tasks(manager_root: PathBuf, cache: Arc<Mutex<CacheManager>>) -> Vec<CleanupTask> {
    let cache_for_expiry = cache.clone();
    let sandboxes_root = manager_root.clone();
    let logs_root = manager_root.clone();
    let temp_root = manager_root;

    vec![
        CleanupTask::new("expired_cache_entries", "entries past TTL across all caches", 1, 1, move || {
            Ok(cache_for_expiry.lock().unwrap().cleanup_expired_entries()?)
        }),
        CleanupTask::new("old_sandbox_environments", "sandbox dirs older than 24h", 2, 6, move || {
            remove_stale_sandboxes(&sandboxes_root)
        }),
        CleanupTask::new("large_log_files", "rotates .log/.out/.err over 100MB", 3, 12, move || {
            rotate_large_logs(&logs_root)
        }),
        CleanupTask::new("temporary_files", "language caches, .pytest_cache, *.tmp", 4, 2, move || {
            remove_temp_files(&temp_root)
        }),
        CleanupTask::new("memory_cache_optimization", "enforces the global cache byte budget", 5, 0, move || {
            Ok(cache.lock().unwrap().enforce_memory_budget())
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ResourceLimits {
        ResourceLimits { max_memory_mb: u64::MAX, max_disk_mb: u64::MAX, max_cpu_percent: 100.0, max_open_files: u32::MAX, max_processes: u32::MAX }
    }

    fn test_cache() -> (tempfile::TempDir, Arc<Mutex<CacheManager>>) {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path(), 64 * 1024 * 1024).unwrap();
        (dir, Arc::new(Mutex::new(cache)))
    }

    #[test]
    fn monitor_once_records_a_sample() {
        let (_dir, cache) = test_cache();
        let gov = ResourceGovernor::new(limits(), "/tmp/does-not-exist", cache);
        gov.run_monitor_once();
        assert_eq!(gov.get_resource_statistics().sample_count, 1);
    }

    #[test]
    fn default_tasks_are_five_and_sorted_by_priority() {
        let (_dir, cache) = test_cache();
        let tasks = default_cleanup_tasks(PathBuf::from("/tmp/does-not-exist"), cache);
        assert_eq!(tasks.len(), 5);
        assert_eq!(tasks[0].name, "expired_cache_entries");
    }

    #[test]
    fn forced_cleanup_runs_disabled_unaware_tasks() {
        let (_dir, cache) = test_cache();
        let gov = ResourceGovernor::new(limits(), "/tmp/does-not-exist", cache);
        gov.run_cleanup_once(true);
        assert!(gov.inner.lock().unwrap().tasks.iter().all(|t| t.last_run.is_some()));
    }

    #[test]
    fn cleanup_reclaims_stale_sandbox_directories() {
        let (_dir, cache) = test_cache();
        let manager_root = tempfile::tempdir().unwrap();
        let stale = manager_root.path().join("workspace_stale");
        std::fs::create_dir_all(&stale).unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(48 * 3600);
        std::fs::File::open(&stale).unwrap().set_modified(old).unwrap();

        let gov = ResourceGovernor::new(limits(), manager_root.path(), cache);
        let reclaimed = gov.run_cleanup_once(true);

        assert!(reclaimed >= 1);
        assert!(!stale.exists());
    }

    #[test]
    fn cleanup_removes_temp_files_and_pycache() {
        let (_dir, cache) = test_cache();
        let manager_root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(manager_root.path().join("workspace_a/__pycache__")).unwrap();
        std::fs::write(manager_root.path().join("workspace_a/scratch.tmp"), b"x").unwrap();

        let gov = ResourceGovernor::new(limits(), manager_root.path(), cache);
        gov.run_cleanup_once(true);

        assert!(!manager_root.path().join("workspace_a/__pycache__").exists());
        assert!(!manager_root.path().join("workspace_a/scratch.tmp").exists());
    }

    #[test]
    fn history_persists_across_instances() {
        let (_dir, cache1) = test_cache();
        let (_dir2, cache2) = test_cache();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.toml");

        let gov = ResourceGovernor::new(limits(), "/tmp/does-not-exist", cache1).with_persistence(&path);
        gov.run_monitor_once();
        gov.run_monitor_once();

        let restored = ResourceGovernor::new(limits(), "/tmp/does-not-exist", cache2).with_persistence(&path);
        assert_eq!(restored.get_resource_statistics().sample_count, 2);
    }

    #[test]
    fn p95_trend_triggers_emergency_cleanup_before_hard_breach() {
        let (_dir, cache) = test_cache();
        let tight = ResourceLimits { max_memory_mb: 1, max_disk_mb: u64::MAX, max_cpu_percent: 100.0, max_open_files: u32::MAX, max_processes: u32::MAX };
        let gov = ResourceGovernor::new(tight, "/tmp/does-not-exist", cache);
        for _ in 0..12 {
            gov.run_monitor_once();
        }
        let inner = gov.inner.lock().unwrap();
        assert!(trending_toward_breach(&gov.limits, &inner.history));
    }

    #[test]
    fn breach_triggers_violation_callback() {
        let (_dir, cache) = test_cache();
        let tight = ResourceLimits { max_memory_mb: 0, max_disk_mb: u64::MAX, max_cpu_percent: 100.0, max_open_files: u32::MAX, max_processes: u32::MAX };
        let gov = ResourceGovernor::new(tight, "/tmp/does-not-exist", cache);
        let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let fired2 = fired.clone();
        gov.on_violation(move |_, _| fired2.store(true, std::sync::atomic::Ordering::SeqCst));
        gov.run_monitor_once();
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn shutdown_signal_interrupts_loop_promptly() {
        let (_dir, cache) = test_cache();
        let gov = Arc::new(ResourceGovernor::new(limits(), "/tmp/does-not-exist", cache));
        let shutdown = ShutdownSignal::new();
        let loop_shutdown = shutdown.clone();
        let gov2 = gov.clone();
        let handle = std::thread::spawn(move || {
            gov2.run_monitor_loop(Duration::from_secs(3600), &loop_shutdown);
        });

        std::thread::sleep(Duration::from_millis(20));
        shutdown.signal();
        handle.join().unwrap();
    }
}
