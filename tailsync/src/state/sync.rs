use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::state::SourceOffset;
use crate::sync_error;
use crate::types::{ENVELOPE_VERSION, Item, SourceInfo};

/// Phase of the replication of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// A full table scan is running.
    Snapshotting,
    /// The snapshot completed and changes are read from the change log.
    Tailing,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Snapshotting => f.write_str("snapshotting"),
            SyncPhase::Tailing => f.write_str("tailing"),
        }
    }
}

/// Key of the last row read by a snapshot, the scan resumes right after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor(Item);

impl Cursor {
    pub fn new(key: Item) -> Self {
        Self(key)
    }

    pub fn as_item(&self) -> &Item {
        &self.0
    }

    pub fn into_item(self) -> Item {
        self.0
    }

    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(&self.0).map_err(|err| {
            sync_error!(
                ErrorKind::SerializationError,
                "Snapshot cursor serialization failed",
                err
            )
        })
    }

    pub fn from_json(json: &str) -> SyncResult<Self> {
        Ok(Self(serde_json::from_str(json)?))
    }
}

/// Progress made by reading one snapshot page.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotDelta {
    /// Cursor to resume from, [`None`] once the table was fully read.
    pub next_cursor: Option<Cursor>,
    pub rows_read: u64,
    pub read_at: DateTime<Utc>,
}

/// Resumption state of a replicated table.
///
/// The state is owned by a single writer, the sync engine. The snapshot scanner and the stream
/// tail classifier read it and report their progress as deltas. A state is never observable
/// without a phase and a snapshot start, and the resume cursor is only present while
/// snapshotting.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    table_name: String,
    phase: SyncPhase,
    snapshot_started_at: DateTime<Utc>,
    snapshot_ended_at: Option<DateTime<Utc>>,
    resume_cursor: Option<Cursor>,
    rows_emitted: u64,
}

impl SyncState {
    /// Creates the state of a table replicated for the first time, with a snapshot starting at
    /// `now`.
    pub fn new(table_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            table_name: table_name.into(),
            phase: SyncPhase::Snapshotting,
            snapshot_started_at: now,
            snapshot_ended_at: None,
            resume_cursor: None,
            rows_emitted: 0,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn snapshot_started_at(&self) -> DateTime<Utc> {
        self.snapshot_started_at
    }

    pub fn snapshot_ended_at(&self) -> Option<DateTime<Utc>> {
        self.snapshot_ended_at
    }

    pub fn resume_cursor(&self) -> Option<&Cursor> {
        self.resume_cursor.as_ref()
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Returns `true` when no row of the current snapshot was read yet.
    pub fn is_fresh_snapshot(&self) -> bool {
        self.phase == SyncPhase::Snapshotting
            && self.rows_emitted == 0
            && self.resume_cursor.is_none()
    }

    /// Returns how long ago the current snapshot started.
    pub fn snapshot_age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.snapshot_started_at
    }

    /// Discards all snapshot progress and starts a new snapshot at `now`.
    pub fn restart_snapshot(&mut self, now: DateTime<Utc>) {
        self.phase = SyncPhase::Snapshotting;
        self.snapshot_started_at = now;
        self.snapshot_ended_at = None;
        self.resume_cursor = None;
        self.rows_emitted = 0;
    }

    /// Applies the progress of a snapshot page.
    ///
    /// A delta without a next cursor completes the snapshot and moves the state to
    /// [`SyncPhase::Tailing`].
    pub fn apply_snapshot_delta(&mut self, delta: &SnapshotDelta) -> SyncResult<()> {
        if self.phase != SyncPhase::Snapshotting {
            bail!(
                ErrorKind::InvalidState,
                "Snapshot progress can only be applied while snapshotting",
                format!("table {} is {}", self.table_name, self.phase)
            );
        }

        self.rows_emitted += delta.rows_read;
        self.resume_cursor = delta.next_cursor.clone();

        if self.resume_cursor.is_none() {
            self.phase = SyncPhase::Tailing;
            self.snapshot_ended_at = Some(delta.read_at);
        }

        Ok(())
    }

    /// Returns the metadata embedded in the envelopes built from this state.
    pub fn source_info(&self, init_sync: bool) -> SourceInfo {
        SourceInfo {
            version: ENVELOPE_VERSION.to_string(),
            table_name: self.table_name.clone(),
            init_sync,
            init_sync_state: self.phase,
            init_sync_start: self.snapshot_started_at.timestamp_millis(),
            init_sync_end: self.snapshot_ended_at.map(|ended| ended.timestamp_millis()),
            init_sync_count: self.rows_emitted,
        }
    }

    /// Returns the persisted form of this state.
    pub fn to_offset(&self) -> SyncResult<SourceOffset> {
        let exclusive_start_key = self
            .resume_cursor
            .as_ref()
            .map(Cursor::to_json)
            .transpose()?;

        Ok(SourceOffset {
            version: ENVELOPE_VERSION.to_string(),
            table_name: self.table_name.clone(),
            init_sync_state: self.phase,
            init_sync_start: self.snapshot_started_at.timestamp_millis(),
            exclusive_start_key,
            init_sync_end: self.snapshot_ended_at.map(|ended| ended.timestamp_millis()),
            init_sync_count: self.rows_emitted,
            src_shard_id: None,
            src_shard_sequence_num: None,
        })
    }

    /// Restores the state of `table_name` from a persisted offset.
    ///
    /// Fails with [`ErrorKind::InvalidResumptionState`] when the offset belongs to another
    /// table or format version, or describes a state that cannot exist.
    pub fn from_offset(offset: &SourceOffset, table_name: &str) -> SyncResult<Self> {
        if offset.table_name != table_name {
            bail!(
                ErrorKind::InvalidResumptionState,
                "Stored offset belongs to another table",
                format!("expected {table_name}, found {}", offset.table_name)
            );
        }

        if offset.version != ENVELOPE_VERSION {
            bail!(
                ErrorKind::InvalidResumptionState,
                "Stored offset has an unsupported version",
                offset.version.clone()
            );
        }

        let snapshot_started_at = millis_to_datetime(offset.init_sync_start)?;
        let snapshot_ended_at = offset.init_sync_end.map(millis_to_datetime).transpose()?;
        let resume_cursor = offset
            .exclusive_start_key
            .as_deref()
            .map(Cursor::from_json)
            .transpose()
            .map_err(|err| invalid_state("exclusive start key cannot be decoded", err))?;

        match offset.init_sync_state {
            SyncPhase::Tailing if resume_cursor.is_some() => {
                bail!(
                    ErrorKind::InvalidResumptionState,
                    "Stored offset violates the sync state invariants",
                    "a tailing table has a resume cursor"
                );
            }
            SyncPhase::Tailing if snapshot_ended_at.is_none() => {
                bail!(
                    ErrorKind::InvalidResumptionState,
                    "Stored offset violates the sync state invariants",
                    "a tailing table has no snapshot end"
                );
            }
            SyncPhase::Snapshotting if snapshot_ended_at.is_some() => {
                bail!(
                    ErrorKind::InvalidResumptionState,
                    "Stored offset violates the sync state invariants",
                    "a running snapshot has an end"
                );
            }
            _ => {}
        }

        if let Some(ended) = snapshot_ended_at
            && ended < snapshot_started_at
        {
            bail!(
                ErrorKind::InvalidResumptionState,
                "Stored offset violates the sync state invariants",
                "the snapshot ended before it started"
            );
        }

        Ok(Self {
            table_name: table_name.to_string(),
            phase: offset.init_sync_state,
            snapshot_started_at,
            snapshot_ended_at,
            resume_cursor,
            rows_emitted: offset.init_sync_count,
        })
    }
}

fn millis_to_datetime(millis: i64) -> SyncResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        sync_error!(
            ErrorKind::InvalidResumptionState,
            "Stored offset has an out of range timestamp",
            millis
        )
    })
}

fn invalid_state(description: &str, err: SyncError) -> SyncError {
    sync_error!(
        ErrorKind::InvalidResumptionState,
        "Stored offset cannot be decoded",
        format!("{description}: {err}")
    )
}
