//! Streaming tail: the queue fed by the shard producers and the classifier draining it.

pub mod classifier;
pub mod queue;

pub use classifier::{StreamTailClassifier, TailOutcome};
pub use queue::{BatchReceiver, BatchSender, Delivery, create_batch_queue};
