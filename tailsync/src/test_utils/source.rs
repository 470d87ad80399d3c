use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::source::{ScanOutput, ScanRequest, TableDescription, TableSource};
use crate::types::Item;

#[derive(Debug)]
struct Inner {
    items: Vec<Item>,
    scan_failures: usize,
    consumed_capacity: f64,
    requests: Vec<ScanRequest>,
}

/// [`TableSource`] serving a table held in memory, in insertion order.
///
/// Pages end with a cursor made of the key attributes of their last row, as long as rows
/// remain after it.
#[derive(Debug, Clone)]
pub struct MemoryTableSource {
    description: TableDescription,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTableSource {
    pub fn new(table_name: &str, key_attributes: &[&str]) -> Self {
        Self {
            description: TableDescription {
                table_name: table_name.to_string(),
                key_attributes: key_attributes.iter().map(|key| key.to_string()).collect(),
                read_capacity_units: None,
            },
            inner: Arc::new(Mutex::new(Inner {
                items: vec![],
                scan_failures: 0,
                consumed_capacity: 0.0,
                requests: vec![],
            })),
        }
    }

    /// Declares the table as provisioned with `read_capacity_units`.
    pub fn with_read_capacity(mut self, read_capacity_units: u64) -> Self {
        self.description.read_capacity_units = Some(read_capacity_units);
        self
    }

    pub async fn insert(&self, item: Item) {
        self.inner.lock().await.items.push(item);
    }

    pub async fn insert_all(&self, items: impl IntoIterator<Item = Item>) {
        self.inner.lock().await.items.extend(items);
    }

    /// Makes the next `count` scans fail.
    pub async fn fail_next_scans(&self, count: usize) {
        self.inner.lock().await.scan_failures = count;
    }

    /// Sets the capacity reported as consumed by every scan.
    pub async fn set_consumed_capacity(&self, consumed_capacity: f64) {
        self.inner.lock().await.consumed_capacity = consumed_capacity;
    }

    /// Returns the scan requests received so far, failed ones included.
    pub async fn requests(&self) -> Vec<ScanRequest> {
        self.inner.lock().await.requests.clone()
    }

    fn key_of(&self, item: &Item) -> Item {
        item.iter()
            .filter(|(name, _)| self.description.key_attributes.contains(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}

impl TableSource for MemoryTableSource {
    async fn describe_table(&self, table_name: &str) -> SyncResult<TableDescription> {
        if table_name != self.description.table_name {
            bail!(
                ErrorKind::SourceQueryFailed,
                "Table does not exist",
                table_name
            );
        }

        Ok(self.description.clone())
    }

    async fn scan(&self, request: ScanRequest) -> SyncResult<ScanOutput> {
        let mut inner = self.inner.lock().await;
        inner.requests.push(request.clone());

        if inner.scan_failures > 0 {
            inner.scan_failures -= 1;
            bail!(
                ErrorKind::SourceQueryFailed,
                "Injected scan failure",
                request.table_name
            );
        }

        let start = match &request.exclusive_start_key {
            Some(cursor) => {
                let Some(position) = inner
                    .items
                    .iter()
                    .position(|item| &self.key_of(item) == cursor)
                else {
                    bail!(
                        ErrorKind::SourceQueryFailed,
                        "Exclusive start key does not match any row",
                        request.table_name
                    );
                };
                position + 1
            }
            None => 0,
        };

        let end = (start + request.limit.max(1)).min(inner.items.len());
        let items = inner.items[start..end].to_vec();
        let last_evaluated_key = if end < inner.items.len() {
            items.last().map(|item| self.key_of(item))
        } else {
            None
        };

        Ok(ScanOutput {
            items,
            last_evaluated_key,
            consumed_capacity: inner.consumed_capacity,
        })
    }
}
