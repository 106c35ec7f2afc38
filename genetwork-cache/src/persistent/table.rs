//! Record table abstraction for the persistent backend.
//!
//! A table stores [`PersistentRecord`]s unique on `(identity, key)`. Writes
//! are conditional on what the caller last read: every mutation states the
//! version it expects and the table refuses it inside the same write
//! transaction if the row moved. That refusal is the conflict signal the
//! backend retries on.

use genetwork_core::{GenetworkResult, Identity, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lru;

/// One cached value owned by one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentRecord {
    pub row_id: Uuid,
    pub identity: Identity,
    pub key: String,
    pub value: String,
    pub last_access: Timestamp,
    /// Bumped on every update; used to detect stale reads.
    pub version: u64,
}

/// Result of a conditional store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The write went through. `inserted` is true for a new row.
    Committed { inserted: bool },
    /// The row appeared, vanished or changed since the caller's read.
    Conflict,
}

/// Row picked for eviction, pinned to the version that was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictCandidate {
    pub key: String,
    pub version: u64,
}

/// Result of a conditional eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    Evicted,
    /// The candidate was deleted or touched concurrently.
    Stale,
    /// The partition is no longer over the requested capacity.
    WithinCapacity,
}

/// Storage engine behind [`PersistentBackend`](super::PersistentBackend).
pub trait RecordTable: Send + Sync {
    /// Table name, unique per declared cache.
    fn name(&self) -> &str;

    fn find(&self, identity: &Identity, key: &str) -> GenetworkResult<Option<PersistentRecord>>;

    /// Write `value` for `(identity, key)` if the stored row still matches
    /// `expected`: `None` means the row must not exist, `Some(v)` means it
    /// must exist at version `v`.
    fn commit_store(
        &self,
        identity: &Identity,
        key: &str,
        value: &str,
        at: Timestamp,
        expected: Option<u64>,
    ) -> GenetworkResult<CommitOutcome>;

    /// Number of rows owned by `identity`.
    fn count(&self, identity: &Identity) -> GenetworkResult<usize>;

    /// Least recently used row of `identity`.
    fn oldest(&self, identity: &Identity) -> GenetworkResult<Option<EvictCandidate>>;

    /// Delete the candidate if it is unchanged and, when `capacity` is given,
    /// the partition is still over it. Both checks run in the deleting
    /// transaction.
    fn evict_if_unchanged(
        &self,
        identity: &Identity,
        candidate: &EvictCandidate,
        capacity: Option<usize>,
    ) -> GenetworkResult<EvictOutcome>;

    /// Remove every row of `identity`. Returns the number removed.
    fn delete_identity(&self, identity: &Identity) -> GenetworkResult<usize>;
}

/// Decide a conditional store against the row found inside the write
/// transaction. Returns the record to write and whether it is new, or `None`
/// on conflict.
pub(crate) fn plan_store(
    current: Option<PersistentRecord>,
    identity: &Identity,
    key: &str,
    value: &str,
    at: Timestamp,
    expected: Option<u64>,
) -> Option<(PersistentRecord, bool)> {
    match (current, expected) {
        (None, None) => Some((
            PersistentRecord {
                row_id: Uuid::now_v7(),
                identity: identity.clone(),
                key: key.to_string(),
                value: value.to_string(),
                last_access: at,
                version: 1,
            },
            true,
        )),
        (Some(mut row), Some(version)) if row.version == version => {
            row.value = value.to_string();
            row.last_access = at;
            row.version += 1;
            Some((row, false))
        }
        _ => None,
    }
}

/// Decide a conditional eviction against the row and partition size found
/// inside the write transaction.
pub(crate) fn plan_evict(
    current: Option<&PersistentRecord>,
    candidate: &EvictCandidate,
    count: usize,
    capacity: Option<usize>,
) -> EvictOutcome {
    if let Some(max_size) = capacity {
        if !lru::over_capacity(count, max_size) {
            return EvictOutcome::WithinCapacity;
        }
    }
    match current {
        Some(row) if row.version == candidate.version => EvictOutcome::Evicted,
        _ => EvictOutcome::Stale,
    }
}

/// Pick the eviction candidate out of an identity's rows.
pub(crate) fn pick_oldest<'a, I>(rows: I) -> Option<EvictCandidate>
where
    I: IntoIterator<Item = &'a PersistentRecord>,
{
    let rows: Vec<&PersistentRecord> = rows.into_iter().collect();
    let key = lru::oldest(rows.iter().map(|r| (r.key.as_str(), r.last_access)))?;
    rows.iter().find(|r| r.key == key).map(|r| EvictCandidate {
        key: r.key.clone(),
        version: r.version,
    })
}
