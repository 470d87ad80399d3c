use std::future::Future;

use crate::error::SyncResult;
use crate::state::SourceOffset;

/// Storage of the resumption offset of each replicated table.
///
/// Implementations must be safe to use concurrently, offsets are stored from the poll path and
/// from event acknowledgments.
pub trait OffsetStore {
    /// Loads the last stored offset of `table_name`, [`None`] if the table was never replicated.
    ///
    /// A stored offset that cannot be decoded is reported as
    /// [`crate::error::ErrorKind::InvalidResumptionState`].
    fn load_offset(
        &self,
        table_name: &str,
    ) -> impl Future<Output = SyncResult<Option<SourceOffset>>> + Send;

    /// Stores `offset` as the resumption point of its table, replacing the previous one.
    fn store_offset(&self, offset: &SourceOffset) -> impl Future<Output = SyncResult<()>> + Send;
}
