//! Shared types for relpack: the artifact record, its kind vocabulary,
//! composable filters and the architecture naming tables.

pub mod arch;
pub mod artifact;
pub mod filter;

// Re-exports
pub use arch::*;
pub use artifact::*;
pub use filter::Filter;

/// Operating system tag used for every Alpine package input and output.
pub const LINUX: &str = "linux";
