//! Built-in capabilities
//!
//! The filesystem and command capabilities the facade wires in by
//! default. External collaborators (retrieval, persistence stores)
//! register their own implementations of [`crate::capability::Capability`].

pub mod command;
pub mod filesystem;

pub use command::RunCommand;
pub use filesystem::{ListDir, ReadFile, WriteFile};
