use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default commands that may never run inside an isolate, regardless of overrides.
const DEFAULT_BLOCKED_COMMANDS: &[&str] = &[
    "sudo", "su", "pkexec", "chmod", "chown", "systemctl", "shutdown", "reboot", "mount",
    "umount", "curl", "wget", "nc", "ncat", "ssh", "scp", "telnet", "docker", "podman", "nsenter",
    "unshare", "chroot", "kill", "killall", "pkill", "dd", "mkfs", "fdisk", "iptables",
];

const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "ls", "cat", "echo", "grep", "find", "sed", "awk", "git", "python", "python3", "pip", "pip3",
    "node", "npm", "npx", "yarn", "pnpm", "cargo", "rustc", "go", "java", "javac", "mvn",
    "gradle", "make", "cmake", "ruby", "gem", "php", "composer", "dotnet", "pytest", "touch",
    "mkdir", "cp", "mv", "rm", "diff", "head", "tail", "wc", "sort", "uniq", "tar", "unzip",
];

const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    r"(?i)\bsudo\b",
    r"(?i)\brm\s+-rf\s+/\s*($|[^a-zA-Z0-9._/-])",
    r"(?i)>\s*/dev/(sd|nvme|hd)",
    r"(?i)curl[^|]*\|\s*(sh|bash)",
    r"(?i)wget[^|]*\|\s*(sh|bash)",
    r"(?i)\bnc\s+-e\b",
    r"/dev/tcp/",
    r":\(\)\s*\{\s*:\|\s*:&\s*\}\s*;\s*:",
    r"(?i)\beval\b.*\$\(",
    r"(?i)\bexec\b.*`",
    r"(?i)\b(mount|umount)\b",
    r"(?i)docker\s+run[^|]*--privileged",
    r"(?i)nsenter\s+-t\s*1\b",
    r">\s*/proc/",
];

/// Default path prefixes an isolate may never reach, even by an otherwise
/// well-formed relative path inside the sandbox.
const DEFAULT_BLOCKED_PATHS: &[&str] = &[
    "/etc", "/proc", "/sys", "/dev", "/root", "/boot", "/var/run", "/run",
];

/// Immutable bag of blocklists, whitelists, and numeric ceilings consulted
/// by the security mediator and resource governor. Construct through
/// [`SecurityPolicyBuilder`]; a bare `SecurityPolicy::default()` is also a
/// valid, fully-populated policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub allowed_paths: HashSet<String>,
    pub blocked_paths: HashSet<String>,
    pub blocked_commands: HashSet<String>,
    pub allowed_commands: HashSet<String>,
    #[serde(with = "regex_vec")]
    pub dangerous_command_patterns: Vec<Regex>,
    pub allow_network: bool,
    pub allowed_domains: HashSet<String>,
    pub blocked_domains: HashSet<String>,
    pub max_file_size_bytes: u64,
    pub max_total_files: u64,
    pub max_cpu_percent: f32,
    pub max_memory_mb: u64,
    pub max_disk_mb: u64,
    pub max_processes: u32,
    pub max_execution_time_s: u64,
}

mod regex_vec {
    use regex::Regex;
    use serde::{Deserialize, Deserializer, Serializer, ser::SerializeSeq};

    pub fn serialize<S: Serializer>(patterns: &[Regex], ser: S) -> Result<S::Ok, S::Error> {
        let mut seq = ser.serialize_seq(Some(patterns.len()))?;
        for p in patterns {
            seq.serialize_element(p.as_str())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Regex>, D::Error> {
        let raw: Vec<String> = Vec::deserialize(de)?;
        raw.into_iter()
            .map(|s| Regex::new(&s).map_err(serde::de::Error::custom))
            .collect()
    }
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        SecurityPolicyBuilder::new()
            .build()
            .expect("built-in default policy must be internally consistent")
    }
}

impl SecurityPolicy {
    /// True if `domain` is reachable under this policy's network rules,
    /// ignoring the loopback/link-local/metadata denylist enforced
    /// unconditionally by the network sub-mediator.
    pub fn domain_allowed(&self, domain: &str) -> bool {
        if !self.allow_network {
            return false;
        }
        if self.blocked_domains.contains(domain) {
            return false;
        }
        if !self.allowed_domains.is_empty() {
            return self.allowed_domains.contains(domain);
        }
        true
    }
}

/// Builder for [`SecurityPolicy`] so overriding one field never requires
/// re-specifying every other default.
pub struct SecurityPolicyBuilder {
    allowed_paths: HashSet<String>,
    blocked_paths: HashSet<String>,
    blocked_commands: HashSet<String>,
    allowed_commands: HashSet<String>,
    dangerous_patterns: Vec<String>,
    allow_network: bool,
    allowed_domains: HashSet<String>,
    blocked_domains: HashSet<String>,
    max_file_size_bytes: u64,
    max_total_files: u64,
    max_cpu_percent: f32,
    max_memory_mb: u64,
    max_disk_mb: u64,
    max_processes: u32,
    max_execution_time_s: u64,
}

impl Default for SecurityPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SecurityPolicyBuilder {
    pub fn new() -> Self {
        Self {
            allowed_paths: HashSet::new(),
            blocked_paths: DEFAULT_BLOCKED_PATHS.iter().map(|s| s.to_string()).collect(),
            blocked_commands: DEFAULT_BLOCKED_COMMANDS.iter().map(|s| s.to_string()).collect(),
            allowed_commands: DEFAULT_ALLOWED_COMMANDS.iter().map(|s| s.to_string()).collect(),
            dangerous_patterns: DEFAULT_DANGEROUS_PATTERNS.iter().map(|s| s.to_string()).collect(),
            allow_network: false,
            allowed_domains: HashSet::new(),
            blocked_domains: HashSet::new(),
            max_file_size_bytes: 100 * 1024 * 1024,
            max_total_files: 10_000,
            max_cpu_percent: 80.0,
            max_memory_mb: 2048,
            max_disk_mb: 4096,
            max_processes: 64,
            max_execution_time_s: 300,
        }
    }

    pub fn blocked_commands(mut self, commands: impl IntoIterator<Item = String>) -> Self {
        self.blocked_commands = commands.into_iter().collect();
        self
    }

    pub fn allowed_commands(mut self, commands: impl IntoIterator<Item = String>) -> Self {
        self.allowed_commands = commands.into_iter().collect();
        self
    }

    pub fn allow_network(mut self, allow: bool) -> Self {
        self.allow_network = allow;
        self
    }

    pub fn allowed_domains(mut self, domains: impl IntoIterator<Item = String>) -> Self {
        self.allowed_domains = domains.into_iter().collect();
        self
    }

    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.max_memory_mb = mb;
        self
    }

    pub fn max_execution_time_s(mut self, secs: u64) -> Self {
        self.max_execution_time_s = secs;
        self
    }

    pub fn build(self) -> Result<SecurityPolicy, CoreError> {
        let overlap: Vec<&String> = self
            .allowed_commands
            .intersection(&self.blocked_commands)
            .collect();
        if !overlap.is_empty() {
            return Err(CoreError::PolicyMisconfig(format!(
                "allowed_commands and blocked_commands overlap on: {overlap:?}"
            )));
        }

        let mut patterns = Vec::with_capacity(self.dangerous_patterns.len());
        for raw in &self.dangerous_patterns {
            let re = Regex::new(raw)
                .map_err(|e| CoreError::PolicyMisconfig(format!("bad pattern '{raw}': {e}")))?;
            patterns.push(re);
        }

        if self.max_processes == 0 {
            return Err(CoreError::PolicyMisconfig(
                "max_processes must be non-zero".into(),
            ));
        }
        if self.max_execution_time_s == 0 {
            return Err(CoreError::PolicyMisconfig(
                "max_execution_time_s must be non-zero".into(),
            ));
        }

        Ok(SecurityPolicy {
            allowed_paths: self.allowed_paths,
            blocked_paths: self.blocked_paths,
            blocked_commands: self.blocked_commands,
            allowed_commands: self.allowed_commands,
            dangerous_command_patterns: patterns,
            allow_network: self.allow_network,
            allowed_domains: self.allowed_domains,
            blocked_domains: self.blocked_domains,
            max_file_size_bytes: self.max_file_size_bytes,
            max_total_files: self.max_total_files,
            max_cpu_percent: self.max_cpu_percent,
            max_memory_mb: self.max_memory_mb,
            max_disk_mb: self.max_disk_mb,
            max_processes: self.max_processes,
            max_execution_time_s: self.max_execution_time_s,
        })
    }
}
