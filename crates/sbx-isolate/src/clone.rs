use std::path::Path;
use std::process::Command;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;

use crate::error::IsolateError;

/// Directories and file globs never copied into a sandbox workspace.
pub const EXCLUDE_PATTERNS: &[&str] = &[
    ".git/objects",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    "build",
    "dist",
    "*.pyc",
    "*.log",
    ".DS_Store",
    "Thumbs.db",
    ".pytest_cache",
    "tmp",
    "temp",
];

fn exclusion_matcher(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in EXCLUDE_PATTERNS {
        // ignore errors from individual malformed globs; the pattern list above is fixed and known good
        let _ = builder.add_line(None, pattern);
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

/// Copy `source` into `dest`, applying the exclusion list. Prefers `cp -a`
/// when present on the platform, falls back to an in-process walk that
/// preserves permissions.
pub fn clone_tree(source: &Path, dest: &Path) -> Result<(), IsolateError> {
    if which::which("cp").is_ok() && cfg!(unix) {
        match clone_tree_cp(source, dest) {
            Ok(()) => return Ok(()),
            Err(e) => tracing::warn!(error = %e, "cp -a clone failed, falling back to in-process copy"),
        }
    }
    clone_tree_walk(source, dest)
}

fn clone_tree_cp(source: &Path, dest: &Path) -> Result<(), IsolateError> {
    std::fs::create_dir_all(dest)?;
    let status = Command::new("cp")
        .arg("-a")
        .arg(format!("{}/.", source.display()))
        .arg(dest)
        .status()
        .map_err(|e| IsolateError::CloneFailed(e.to_string()))?;
    if !status.success() {
        return Err(IsolateError::CloneFailed(format!("cp exited with {status}")));
    }
    prune_excluded(dest)
}

/// `cp -a` doesn't know about our exclusion list, so sweep the excluded
/// paths out of the destination afterward.
fn prune_excluded(dest: &Path) -> Result<(), IsolateError> {
    let matcher = exclusion_matcher(dest);
    let mut to_remove = Vec::new();
    for entry in WalkBuilder::new(dest).hidden(false).git_ignore(false).build() {
        let entry = entry.map_err(|e| IsolateError::CloneFailed(e.to_string()))?;
        let path = entry.path();
        if path == dest {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        if matcher.matched(path, is_dir).is_ignore() {
            to_remove.push((path.to_path_buf(), is_dir));
        }
    }
    for (path, is_dir) in to_remove {
        if !path.exists() {
            continue;
        }
        if is_dir {
            let _ = std::fs::remove_dir_all(&path);
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(())
}

fn clone_tree_walk(source: &Path, dest: &Path) -> Result<(), IsolateError> {
    let matcher = exclusion_matcher(source);
    std::fs::create_dir_all(dest)?;
    for entry in WalkBuilder::new(source).hidden(false).git_ignore(false).build() {
        let entry = entry.map_err(|e| IsolateError::CloneFailed(e.to_string()))?;
        let path = entry.path();
        if path == source {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        if matcher.matched(path, is_dir).is_ignore() {
            continue;
        }
        let rel = path.strip_prefix(source).unwrap();
        let target = dest.join(rel);
        if is_dir {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(path, &target)?;
            copy_permissions(path, &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_permissions(source: &Path, target: &Path) -> Result<(), IsolateError> {
    let perms = std::fs::metadata(source)?.permissions();
    std::fs::set_permissions(target, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_permissions(_source: &Path, _target: &Path) -> Result<(), IsolateError> {
    Ok(())
}

/// Copy sandbox contents back onto `target`, skipping VCS metadata.
pub fn merge_tree(sandbox_path: &Path, target: &Path) -> Result<(), IsolateError> {
    if which::which("cp").is_ok() && cfg!(unix) {
        let status = Command::new("rsync")
            .arg("-a")
            .arg("--exclude")
            .arg(".git")
            .arg(format!("{}/", sandbox_path.display()))
            .arg(target)
            .status();
        if let Ok(status) = status {
            if status.success() {
                return Ok(());
            }
        }
    }
    merge_tree_walk(sandbox_path, target)
}

fn merge_tree_walk(source: &Path, dest: &Path) -> Result<(), IsolateError> {
    for entry in WalkBuilder::new(source).hidden(false).git_ignore(false).build() {
        let entry = entry.map_err(|e| IsolateError::CloneFailed(e.to_string()))?;
        let path = entry.path();
        if path == source {
            continue;
        }
        if path.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        let rel = path.strip_prefix(source).unwrap();
        let target = dest.join(rel);
        if is_dir {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(path, &target)?;
        }
    }
    Ok(())
}

pub fn has_git_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Copy `.git` verbatim and reset the working tree to HEAD. A reset
/// failure is logged but never fails isolate creation.
pub fn preserve_git_history(source: &Path, sandbox_path: &Path) {
    let source_git = source.join(".git");
    let sandbox_git = sandbox_path.join(".git");
    if !source_git.exists() {
        return;
    }
    if sandbox_git.exists() {
        let _ = std::fs::remove_dir_all(&sandbox_git);
    }
    if let Err(e) = clone_tree_walk(&source_git, &sandbox_git) {
        tracing::warn!(error = %e, "failed to copy git metadata");
        return;
    }
    let result = Command::new("git")
        .args(["reset", "--hard", "HEAD"])
        .current_dir(sandbox_path)
        .output();
    match result {
        Ok(output) if output.status.success() => {
            tracing::info!("git history preserved");
        }
        Ok(output) => {
            tracing::warn!(stderr = %String::from_utf8_lossy(&output.stderr), "git reset failed");
        }
        Err(e) => {
            tracing::warn!(error = %e, "git reset could not be invoked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clone_tree_walk_excludes_pycache() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("__pycache__")).unwrap();
        std::fs::write(src.path().join("__pycache__/a.pyc"), b"x").unwrap();
        std::fs::write(src.path().join("main.py"), b"print(1)").unwrap();

        let dst = tempdir().unwrap();
        clone_tree_walk(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("main.py").exists());
        assert!(!dst.path().join("__pycache__").exists());
    }

    #[test]
    fn merge_tree_walk_skips_git() {
        let src = tempdir().unwrap();
        std::fs::create_dir_all(src.path().join(".git")).unwrap();
        std::fs::write(src.path().join(".git/HEAD"), b"ref: refs/heads/main").unwrap();
        std::fs::write(src.path().join("a.txt"), b"data").unwrap();

        let dst = tempdir().unwrap();
        merge_tree_walk(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("a.txt").exists());
        assert!(!dst.path().join(".git").exists());
    }

    #[test]
    fn has_git_repository_detects_dot_git() {
        let dir = tempdir().unwrap();
        assert!(!has_git_repository(dir.path()));
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(has_git_repository(dir.path()));
    }
}
