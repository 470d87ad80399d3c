//! Resumption state of a replicated table.

mod offset;
mod sync;

pub use offset::*;
pub use sync::*;
