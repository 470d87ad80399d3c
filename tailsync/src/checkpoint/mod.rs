//! Tracking and checkpointing of the progress made on each shard.

pub mod base;
pub mod registry;

pub use base::Checkpointer;
pub use registry::{CheckpointOutcome, ReleaseMode, ShardCheckpointRegistry};
