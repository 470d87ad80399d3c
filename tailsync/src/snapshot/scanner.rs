use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tailsync_config::shared::SnapshotConfig;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::conversions::EventConverter;
use crate::error::SyncResult;
use crate::metrics::{
    CONVERSION_ERROR, REASON, TABLE, TAILSYNC_SKIPPED_RECORDS_TOTAL,
    TAILSYNC_SNAPSHOT_PAGE_DURATION_SECONDS, TAILSYNC_SNAPSHOT_ROWS_TOTAL,
};
use crate::snapshot::rate_limit::{RateLimiter, recalibrate_permits};
use crate::source::{ScanRequest, TableDescription, TableSource};
use crate::state::{Cursor, SnapshotDelta, SyncState};
use crate::types::ChangeEvent;

/// Result of reading one snapshot page.
#[derive(Debug, Clone)]
pub struct SnapshotPage {
    /// Read events of the page rows. Only the last one carries the state reached after the page.
    pub events: Vec<ChangeEvent>,
    /// Progress to apply to the sync state.
    pub delta: SnapshotDelta,
}

/// Reads a table page by page on behalf of the sync engine.
#[derive(Debug)]
pub struct SnapshotScanner<T> {
    source: T,
    table_name: String,
    page_size: usize,
    rate_limiter: Option<RateLimiter>,
    permits: u64,
    converter: Arc<EventConverter>,
}

impl<T> SnapshotScanner<T>
where
    T: TableSource,
{
    pub fn new(
        source: T,
        description: &TableDescription,
        config: &SnapshotConfig,
        converter: Arc<EventConverter>,
    ) -> Self {
        Self {
            source,
            table_name: description.table_name.clone(),
            page_size: config.page_size,
            rate_limiter: RateLimiter::for_read_capacity(
                description.read_capacity_units,
                config.rate_limit_divisor,
            ),
            permits: 1,
            converter,
        }
    }

    /// Reads the page following the cursor of `state`.
    ///
    /// Every row becomes a read event stamped with `state`, except the last one which is stamped
    /// with the state reached after the page, so that acknowledging it resumes the scan after
    /// the page (or records the end of the snapshot). Rows that cannot be converted are skipped.
    /// Read failures are returned as is, `state` is left untouched.
    pub async fn scan_page<K>(&mut self, state: &SyncState, clock: &K) -> SyncResult<SnapshotPage>
    where
        K: Clock + Sync,
    {
        let started = Instant::now();

        if let Some(rate_limiter) = self.rate_limiter.as_mut() {
            let waited = rate_limiter.acquire(self.permits).await;
            if !waited.is_zero() {
                debug!(table = %self.table_name, waited_ms = waited.as_millis() as u64, "snapshot read rate limited");
            }
        }

        let output = self
            .source
            .scan(ScanRequest {
                table_name: self.table_name.clone(),
                limit: self.page_size,
                exclusive_start_key: state.resume_cursor().map(|cursor| cursor.as_item().clone()),
            })
            .await?;

        if self.rate_limiter.is_some() {
            self.permits = recalibrate_permits(output.consumed_capacity);
        }

        let delta = SnapshotDelta {
            next_cursor: output.last_evaluated_key.map(Cursor::new),
            rows_read: output.items.len() as u64,
            read_at: clock.now(),
        };
        let mut post_page = state.clone();
        post_page.apply_snapshot_delta(&delta)?;

        let mut events = Vec::with_capacity(output.items.len());
        let mut last_converted = None;
        for item in &output.items {
            match self.converter.snapshot_event(state, item) {
                Ok(event) => {
                    events.push(event);
                    last_converted = Some(item);
                }
                Err(err) => {
                    warn!(table = %self.table_name, error = %err, "skipping snapshot row that cannot be converted");
                    counter!(TAILSYNC_SKIPPED_RECORDS_TOTAL, TABLE => self.table_name.clone(), REASON => CONVERSION_ERROR)
                        .increment(1);
                }
            }
        }

        if let Some(item) = last_converted {
            events.pop();
            events.push(self.converter.snapshot_event(&post_page, item)?);
        }

        counter!(TAILSYNC_SNAPSHOT_ROWS_TOTAL, TABLE => self.table_name.clone())
            .increment(events.len() as u64);
        histogram!(TAILSYNC_SNAPSHOT_PAGE_DURATION_SECONDS, TABLE => self.table_name.clone())
            .record(started.elapsed().as_secs_f64());

        debug!(
            table = %self.table_name,
            rows = delta.rows_read,
            events = events.len(),
            exhausted = delta.next_cursor.is_none(),
            "read snapshot page"
        );

        Ok(SnapshotPage { events, delta })
    }
}
