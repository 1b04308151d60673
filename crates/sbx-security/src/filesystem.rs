use std::path::{Path, PathBuf};

use sbx_core::{Isolate, SecurityPolicy};

/// File operation kinds the filesystem sub-mediator discriminates between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    Delete,
    Execute,
}

/// Names the delete operation refuses regardless of policy, because
/// removing them would corrupt the isolate's own bookkeeping.
const PROTECTED_NAMES: &[&str] = &[".git", "Cargo.toml", "package.json", "go.mod", "pyproject.toml"];

/// Resolve `path` (absolute or relative to `isolate.sandbox_path`) to its
/// canonical form and check it against the policy and the isolate boundary.
///
/// Canonicalization happens before the containment check: a lexical
/// prefix comparison on the unresolved string would let a symlink inside
/// the sandbox point outside it.
pub fn validate_path(path: &Path, isolate: &Isolate, policy: &SecurityPolicy) -> bool {
    let candidate = if path.is_absolute() {
        path.to_path_buf()
    } else {
        isolate.sandbox_path.join(path)
    };

    if looks_dangerous(&candidate.to_string_lossy()) {
        return false;
    }

    let resolved = match canonicalize_best_effort(&candidate) {
        Some(p) => p,
        None => return false,
    };

    if !resolved.starts_with(&isolate.sandbox_path) {
        return false;
    }

    let resolved_str = resolved.to_string_lossy();
    for blocked in &policy.blocked_paths {
        if resolved_str.starts_with(blocked.as_str()) {
            return false;
        }
    }

    true
}

/// Canonicalize a path that may not exist yet: resolve as far as the
/// nearest existing ancestor, then append the remaining (not-yet-created)
/// components lexically.
fn canonicalize_best_effort(path: &Path) -> Option<PathBuf> {
    if let Ok(canon) = path.canonicalize() {
        return Some(canon);
    }
    let parent = path.parent()?;
    let file_name = path.file_name()?;
    let canon_parent = canonicalize_best_effort(parent)?;
    Some(canon_parent.join(file_name))
}

fn looks_dangerous(raw: &str) -> bool {
    raw.contains("..")
        || raw.starts_with("/etc/")
        || raw.starts_with("/proc/")
        || raw.starts_with("/sys/")
        || raw.starts_with("/dev/")
        || raw.starts_with("/root/")
        || raw.starts_with("~/")
}

/// Additional checks layered on top of [`validate_path`] depending on the
/// operation being performed.
pub fn validate_file_operation(
    op: FileOp,
    path: &Path,
    isolate: &Isolate,
    policy: &SecurityPolicy,
    existing_size_bytes: Option<u64>,
    current_file_count: u64,
) -> bool {
    if !validate_path(path, isolate, policy) {
        return false;
    }

    match op {
        FileOp::Write => {
            if let Some(size) = existing_size_bytes {
                if size > policy.max_file_size_bytes {
                    return false;
                }
            }
            current_file_count <= policy.max_total_files
        }
        FileOp::Delete => {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            !PROTECTED_NAMES.contains(&name)
        }
        FileOp::Execute => {
            let argv0 = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            !policy.blocked_commands.contains(argv0)
        }
        FileOp::Read => true,
    }
}
