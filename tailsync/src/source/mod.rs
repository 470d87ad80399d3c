//! Contract of the table being replicated.

mod base;

pub use base::*;
