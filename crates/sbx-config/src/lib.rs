//! Sandbox-wide configuration loading and validation.

pub mod paths;
pub mod sandbox_config;

pub use paths::{APP_NAME, LEGACY_APP_NAME};
pub use sandbox_config::SandboxConfig;
