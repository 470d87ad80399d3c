mod base;
mod sync;

pub use base::*;
pub use sync::*;
