//! Rate limited, paginated full table reads.

pub mod rate_limit;
pub mod scanner;

pub use rate_limit::RateLimiter;
pub use scanner::{SnapshotPage, SnapshotScanner};
