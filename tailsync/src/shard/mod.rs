//! Integration with the change log coordinator owning the shard leases.

pub mod handler;
pub mod lifecycle;

pub use handler::ShardHandler;
pub use lifecycle::ShardLifecycle;
