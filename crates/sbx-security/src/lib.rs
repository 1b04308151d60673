//! Security mediator: four sub-mediators (filesystem, command, network,
//! resource) that each answer "is this allowed?" against a
//! [`sbx_core::SecurityPolicy`], plus an aggregate façade.

pub mod command;
pub mod error;
pub mod filesystem;
pub mod mediator;
pub mod network;
pub mod resource;

pub use command::validate_command;
pub use error::SecurityError;
pub use filesystem::{validate_file_operation, validate_path, FileOp};
pub use mediator::{Operation, PolicySummary, SecurityMediator, SecurityStatus};
pub use network::validate_network_access;
pub use resource::ResourceBackend;
