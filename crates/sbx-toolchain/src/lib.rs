//! Toolchain adapter: detects an isolate's toolchain, build system, and
//! test framework, then maps `install | build | test | lint | format |
//! clean` to concrete command sequences and records a verified outcome
//! for each invocation.

pub mod detect;
pub mod error;
pub mod runner;
pub mod verbs;

pub use detect::{detect_build_system, detect_test_framework, detect_toolchain, BuildSystem, ToolchainType};
pub use error::ToolchainError;
pub use runner::{InvocationEvidence, InvocationOptions, ToolchainRunner};
pub use verbs::{command_for, Verb};
