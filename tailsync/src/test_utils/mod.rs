//! Test doubles for the external dependencies of a sync task.
//!
//! Provides a manually driven clock, an in-memory table source, a recording checkpointer and
//! builders of change records.
pub mod checkpointer;
pub mod clock;
pub mod record;
pub mod source;
