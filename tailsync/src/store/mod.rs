//! Persistence of the resumption offsets of replicated tables.

pub mod base;
pub mod file;
pub mod memory;

pub use base::OffsetStore;
