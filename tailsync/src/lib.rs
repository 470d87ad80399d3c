//! Replication of a key-value table into an ordered stream of change events.
//!
//! A [`task::SyncTask`] first snapshots the whole table through a [`source::TableSource`], then
//! tails the change records delivered by the change log coordinator through a
//! [`shard::ShardHandler`]. Its progress is stored through an [`store::OffsetStore`] and the
//! progress of each shard is checkpointed through a [`checkpoint::Checkpointer`].

pub mod checkpoint;
pub mod clock;
pub mod concurrency;
pub mod conversions;
pub mod engine;
pub mod error;
mod macros;
mod metrics;
pub mod shard;
pub mod snapshot;
pub mod source;
pub mod state;
pub mod store;
pub mod stream;
pub mod task;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
