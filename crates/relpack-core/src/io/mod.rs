//! Side effects: external processes and object storage.

pub mod store;
pub mod tool;
