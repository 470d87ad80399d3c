use std::future::Future;

use crate::error::SyncResult;
use crate::types::Item;

/// Description of the replicated table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescription {
    pub table_name: String,
    /// Names of the key attributes, partition key first.
    pub key_attributes: Vec<String>,
    /// Provisioned read capacity, [`None`] for on-demand tables.
    pub read_capacity_units: Option<u64>,
}

/// A paginated scan request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub table_name: String,
    /// Maximum number of rows to return.
    pub limit: usize,
    /// Key of the last row of the previous page, [`None`] to start from the beginning.
    pub exclusive_start_key: Option<Item>,
}

/// A page of scanned rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanOutput {
    pub items: Vec<Item>,
    /// Key to resume the scan from, [`None`] once the table was fully read.
    pub last_evaluated_key: Option<Item>,
    /// Read capacity consumed by the request.
    pub consumed_capacity: f64,
}

/// Table whose rows and changes are replicated.
///
/// Failures are reported as [`crate::error::ErrorKind::SourceQueryFailed`] and are not retried by
/// the caller, the next poll starts again from the persisted state.
pub trait TableSource {
    /// Describes the table named `table_name`.
    fn describe_table(
        &self,
        table_name: &str,
    ) -> impl Future<Output = SyncResult<TableDescription>> + Send;

    /// Reads one page of rows.
    fn scan(&self, request: ScanRequest) -> impl Future<Output = SyncResult<ScanOutput>> + Send;
}
