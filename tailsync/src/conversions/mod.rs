//! Conversion of snapshot rows and change records into emitted events.

pub mod event;

pub use event::EventConverter;
