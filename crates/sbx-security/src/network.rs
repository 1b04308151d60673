use sbx_core::SecurityPolicy;

const ALWAYS_BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    "169.254.169.254", // cloud instance-metadata endpoint
    "metadata.google.internal",
];

/// Validate outbound network access to `host` (optionally `port`) against
/// the policy. Loopback, link-local, and cloud-metadata hosts are denied
/// unconditionally, independent of any allow/deny list.
pub fn validate_network_access(host: &str, _port: Option<u16>, policy: &SecurityPolicy) -> bool {
    if ALWAYS_BLOCKED_HOSTS.contains(&host) || is_link_local(host) {
        return false;
    }
    policy.domain_allowed(host)
}

fn is_link_local(host: &str) -> bool {
    host.starts_with("169.254.") || host.starts_with("fe80:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_core::SecurityPolicyBuilder;

    #[test]
    fn network_denied_when_policy_disallows() {
        let policy = SecurityPolicy::default();
        assert!(!validate_network_access("pypi.org", None, &policy));
    }

    #[test]
    fn metadata_endpoint_always_blocked() {
        let policy = SecurityPolicyBuilder::new().allow_network(true).build().unwrap();
        assert!(!validate_network_access("169.254.169.254", None, &policy));
    }

    #[test]
    fn allowlisted_domain_is_reachable() {
        let policy = SecurityPolicyBuilder::new()
            .allow_network(true)
            .allowed_domains(["pypi.org".to_string()])
            .build()
            .unwrap();
        assert!(validate_network_access("pypi.org", None, &policy));
        assert!(!validate_network_access("evil.example", None, &policy));
    }
}
