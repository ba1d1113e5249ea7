//! vmforge shared - types common to the orchestrator library and the CLI.
//!
//! This crate contains the error taxonomy and the constants that define
//! the per-user network topology.

pub mod constants;
pub mod errors;

pub use errors::{
    ConfigError, ConnectionError, DomainError, ErrorCategory, ErrorContext, NetworkError,
    SeedError, StorageError, VmforgeError, VmforgeResult,
};
