pub mod builder;
pub mod clone;
pub mod error;

pub use builder::IsolateBuilder;
pub use error::IsolateError;
