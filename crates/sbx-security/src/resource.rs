use sbx_core::{Isolate, ResourceUsage, SecurityPolicy};

/// Backend that actually applies and samples resource ceilings for an
/// isolate (container cgroup, `setrlimit`, or a no-op). Implemented by
/// `sbx-governor`; kept as a trait here so the security mediator's
/// façade can route to it without a dependency in the other direction.
pub trait ResourceBackend {
    /// Push `policy`'s cpu/memory/pid ceilings onto the isolate. Failure
    /// degrades to a warning; it must never be treated as a security
    /// denial.
    fn apply_resource_limits(&self, isolate: &Isolate, policy: &SecurityPolicy) -> anyhow::Result<()>;

    /// Sample current resource usage for the isolate.
    fn monitor_resource_usage(&self, isolate: &Isolate) -> anyhow::Result<ResourceUsage>;
}

impl<T: ResourceBackend + ?Sized> ResourceBackend for std::sync::Arc<T> {
    fn apply_resource_limits(&self, isolate: &Isolate, policy: &SecurityPolicy) -> anyhow::Result<()> {
        (**self).apply_resource_limits(isolate, policy)
    }

    fn monitor_resource_usage(&self, isolate: &Isolate) -> anyhow::Result<ResourceUsage> {
        (**self).monitor_resource_usage(isolate)
    }
}

/// Backend used when no container/cgroup/rlimit mechanism is available;
/// always succeeds and reports zeroed usage.
pub struct NoopResourceBackend;

impl ResourceBackend for NoopResourceBackend {
    fn apply_resource_limits(&self, _isolate: &Isolate, _policy: &SecurityPolicy) -> anyhow::Result<()> {
        Ok(())
    }

    fn monitor_resource_usage(&self, _isolate: &Isolate) -> anyhow::Result<ResourceUsage> {
        Ok(ResourceUsage::sample_now(0, 0, 0.0, 0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_core::IsolationConfig;

    #[test]
    fn noop_backend_always_succeeds() {
        let isolate = Isolate::new(
            "iso1".into(),
            "/src".into(),
            "/sandbox/iso1".into(),
            IsolationConfig::default(),
        );
        let policy = SecurityPolicy::default();
        let backend = NoopResourceBackend;
        assert!(backend.apply_resource_limits(&isolate, &policy).is_ok());
        assert!(backend.monitor_resource_usage(&isolate).is_ok());
    }
}
