use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::SyncResult;
use crate::state::SourceOffset;
use crate::store::OffsetStore;

#[derive(Debug)]
struct Inner {
    offsets: HashMap<String, SourceOffset>,
    stores: usize,
}

/// [`OffsetStore`] keeping offsets in memory.
#[derive(Debug, Clone)]
pub struct MemoryOffsetStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        let inner = Inner {
            offsets: HashMap::new(),
            stores: 0,
        };

        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Creates a store already holding `offset`.
    pub fn with_offset(offset: SourceOffset) -> Self {
        let mut offsets = HashMap::new();
        offsets.insert(offset.table_name.clone(), offset);

        Self {
            inner: Arc::new(Mutex::new(Inner { offsets, stores: 0 })),
        }
    }

    /// Returns the number of offsets stored so far.
    pub async fn store_count(&self) -> usize {
        self.inner.lock().await.stores
    }
}

impl Default for MemoryOffsetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetStore for MemoryOffsetStore {
    async fn load_offset(&self, table_name: &str) -> SyncResult<Option<SourceOffset>> {
        let inner = self.inner.lock().await;

        Ok(inner.offsets.get(table_name).cloned())
    }

    async fn store_offset(&self, offset: &SourceOffset) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        inner
            .offsets
            .insert(offset.table_name.clone(), offset.clone());
        inner.stores += 1;

        Ok(())
    }
}
