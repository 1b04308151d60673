use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainType {
    Python,
    Node,
    Java,
    Rust,
    Go,
    DotNet,
    Ruby,
    Php,
    Generic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSystem {
    Make,
    Cmake,
    Gradle,
    Maven,
    Npm,
    Yarn,
    Cargo,
    Go,
    Setuptools,
    Poetry,
    Webpack,
    Vite,
    Generic,
}

fn has(dir: &Path, name: &str) -> bool {
    dir.join(name).exists()
}

fn has_glob_suffix(dir: &Path, suffix: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().ends_with(suffix))
}

/// Detect the dominant toolchain from manifest presence in the isolate root.
pub fn detect_toolchain(dir: &Path) -> ToolchainType {
    if has(dir, "Cargo.toml") {
        ToolchainType::Rust
    } else if has(dir, "go.mod") {
        ToolchainType::Go
    } else if has(dir, "package.json") {
        ToolchainType::Node
    } else if has(dir, "pom.xml") || has(dir, "build.gradle") || has(dir, "build.gradle.kts") {
        ToolchainType::Java
    } else if has(dir, "pyproject.toml") || has(dir, "setup.py") || has(dir, "requirements.txt") {
        ToolchainType::Python
    } else if has_glob_suffix(dir, ".csproj") || has_glob_suffix(dir, ".sln") {
        ToolchainType::DotNet
    } else if has(dir, "Gemfile") {
        ToolchainType::Ruby
    } else if has(dir, "composer.json") {
        ToolchainType::Php
    } else {
        ToolchainType::Generic
    }
}

/// Detect the build system used to drive the detected toolchain.
pub fn detect_build_system(dir: &Path, toolchain: ToolchainType) -> BuildSystem {
    match toolchain {
        ToolchainType::Rust => BuildSystem::Cargo,
        ToolchainType::Go => BuildSystem::Go,
        ToolchainType::Java => {
            if has(dir, "pom.xml") {
                BuildSystem::Maven
            } else {
                BuildSystem::Gradle
            }
        }
        ToolchainType::Node => {
            if has(dir, "vite.config.ts") || has(dir, "vite.config.js") {
                BuildSystem::Vite
            } else if has(dir, "webpack.config.js") {
                BuildSystem::Webpack
            } else if has(dir, "yarn.lock") {
                BuildSystem::Yarn
            } else {
                BuildSystem::Npm
            }
        }
        ToolchainType::Python => {
            if has(dir, "poetry.lock") || pyproject_has_poetry(dir) {
                BuildSystem::Poetry
            } else if has(dir, "setup.py") {
                BuildSystem::Setuptools
            } else {
                BuildSystem::Generic
            }
        }
        _ => {
            if has(dir, "CMakeLists.txt") {
                BuildSystem::Cmake
            } else if has(dir, "Makefile") {
                BuildSystem::Make
            } else {
                BuildSystem::Generic
            }
        }
    }
}

fn pyproject_has_poetry(dir: &Path) -> bool {
    std::fs::read_to_string(dir.join("pyproject.toml"))
        .map(|s| s.contains("[tool.poetry]"))
        .unwrap_or(false)
}

/// Detect the test framework from dependency manifests and filesystem heuristics.
pub fn detect_test_framework(dir: &Path, toolchain: ToolchainType) -> Option<String> {
    match toolchain {
        ToolchainType::Rust => Some("cargo-test".to_string()),
        ToolchainType::Python => {
            let deps = std::fs::read_to_string(dir.join("pyproject.toml"))
                .or_else(|_| std::fs::read_to_string(dir.join("requirements.txt")))
                .unwrap_or_default();
            if deps.contains("pytest") {
                Some("pytest".to_string())
            } else if dir.join("tests").is_dir() {
                Some("unittest".to_string())
            } else {
                None
            }
        }
        ToolchainType::Node => {
            let pkg = std::fs::read_to_string(dir.join("package.json")).unwrap_or_default();
            if pkg.contains("\"vitest\"") {
                Some("vitest".to_string())
            } else if pkg.contains("\"jest\"") {
                Some("jest".to_string())
            } else if pkg.contains("\"mocha\"") {
                Some("mocha".to_string())
            } else {
                None
            }
        }
        ToolchainType::Go => Some("go-test".to_string()),
        ToolchainType::Java => {
            if has(dir, "pom.xml") {
                Some("junit-maven".to_string())
            } else {
                Some("junit-gradle".to_string())
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn detects_rust_from_cargo_toml() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]\n").unwrap();
        assert_eq!(detect_toolchain(dir.path()), ToolchainType::Rust);
        assert_eq!(detect_build_system(dir.path(), ToolchainType::Rust), BuildSystem::Cargo);
    }

    #[test]
    fn detects_node_yarn_over_npm() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("yarn.lock"), "").unwrap();
        assert_eq!(detect_build_system(dir.path(), ToolchainType::Node), BuildSystem::Yarn);
    }

    #[test]
    fn detects_python_poetry_from_pyproject() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("pyproject.toml"), "[tool.poetry]\nname = \"x\"\n").unwrap();
        assert_eq!(detect_toolchain(dir.path()), ToolchainType::Python);
        assert_eq!(detect_build_system(dir.path(), ToolchainType::Python), BuildSystem::Poetry);
    }

    #[test]
    fn falls_back_to_generic_with_no_manifests() {
        let dir = tempdir().unwrap();
        assert_eq!(detect_toolchain(dir.path()), ToolchainType::Generic);
    }

    #[test]
    fn generic_toolchain_with_makefile_uses_make() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("Makefile"), "all:\n").unwrap();
        assert_eq!(detect_build_system(dir.path(), ToolchainType::Generic), BuildSystem::Make);
    }

    #[test]
    fn detects_pytest_from_requirements() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "pytest==8.0\n").unwrap();
        assert_eq!(detect_test_framework(dir.path(), ToolchainType::Python).as_deref(), Some("pytest"));
    }
}
