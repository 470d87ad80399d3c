//! Data types flowing through the synchronization engine.

mod attribute;
mod event;
mod record;
mod sequence;

pub use attribute::*;
pub use event::*;
pub use record::*;
pub use sequence::*;
