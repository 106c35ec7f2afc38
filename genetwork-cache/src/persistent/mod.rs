//! Server-side backend: one row per `(identity, key)` in a shared table.
//!
//! Writes use optimistic concurrency. A store reads the current row, then
//! asks the table to commit only if that row is unchanged. A refused commit
//! is retried from the read, up to `max_attempts` times, after which the
//! caller gets `StorageError::ConflictExceeded`.
//!
//! ```text
//! find(identity, key) ──► commit_store(expected version)
//!        ▲                        │
//!        └──── Conflict ◄─────────┤
//!                                 ▼ Committed { inserted: true }
//!                     evict while over capacity (re-checked per attempt)
//! ```

mod lmdb;
mod memory;
mod record_key;
mod table;

pub use lmdb::{open_env, LmdbRecordTable, MAX_TABLES};
pub use memory::InMemoryRecordTable;
pub use record_key::RecordKey;
pub use table::{
    CommitOutcome, EvictCandidate, EvictOutcome, PersistentRecord, RecordTable,
};

use genetwork_core::{AccessClock, CacheEntry, GenetworkResult, Identity, StorageError};
use tracing::debug;

use crate::traits::{CacheBackend, StoreOutcome};

/// Backend over one identity's rows in a [`RecordTable`].
pub struct PersistentBackend<'s> {
    table: &'s dyn RecordTable,
    identity: Identity,
    max_size: usize,
    max_attempts: u32,
    clock: &'s AccessClock,
}

impl<'s> PersistentBackend<'s> {
    pub fn new(
        table: &'s dyn RecordTable,
        identity: Identity,
        max_size: usize,
        max_attempts: u32,
        clock: &'s AccessClock,
    ) -> Self {
        Self {
            table,
            identity,
            max_size,
            max_attempts,
            clock,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn exceeded(&self, operation: &str) -> StorageError {
        StorageError::ConflictExceeded {
            operation: operation.to_string(),
            attempts: self.max_attempts,
        }
    }

    /// Evict the oldest row, retrying when the pick goes stale.
    ///
    /// With `capacity` set, stops as soon as the partition is within it, so
    /// racing evictors remove one row per over-capacity condition.
    fn evict_with(&self, capacity: Option<usize>) -> GenetworkResult<(bool, u32)> {
        let mut conflicts = 0;
        for attempt in 1..=self.max_attempts {
            let Some(candidate) = self.table.oldest(&self.identity)? else {
                return Ok((false, conflicts));
            };

            match self
                .table
                .evict_if_unchanged(&self.identity, &candidate, capacity)?
            {
                EvictOutcome::Evicted => {
                    debug!(
                        table = self.table.name(),
                        identity = %self.identity,
                        key = %candidate.key,
                        "Evicted persistent row"
                    );
                    return Ok((true, conflicts));
                }
                EvictOutcome::WithinCapacity => return Ok((false, conflicts)),
                EvictOutcome::Stale => {
                    conflicts += 1;
                    debug!(
                        table = self.table.name(),
                        identity = %self.identity,
                        attempt,
                        "Eviction candidate went stale, retrying"
                    );
                }
            }
        }
        Err(self.exceeded("evict").into())
    }
}

impl CacheBackend for PersistentBackend<'_> {
    fn lookup(&mut self, key: &str) -> GenetworkResult<Option<CacheEntry>> {
        Ok(self
            .table
            .find(&self.identity, key)?
            .map(|row| CacheEntry::new(row.value, row.last_access)))
    }

    fn store(&mut self, key: &str, value: &str) -> GenetworkResult<StoreOutcome> {
        let mut conflicts = 0;
        for attempt in 1..=self.max_attempts {
            let expected = self.table.find(&self.identity, key)?.map(|row| row.version);

            match self
                .table
                .commit_store(&self.identity, key, value, self.clock.now(), expected)?
            {
                CommitOutcome::Committed { inserted } => {
                    let mut outcome = StoreOutcome {
                        evicted: false,
                        conflicts,
                    };
                    if inserted {
                        let (evicted, evict_conflicts) = self.evict_with(Some(self.max_size))?;
                        outcome.evicted = evicted;
                        outcome.conflicts += evict_conflicts;
                    }
                    return Ok(outcome);
                }
                CommitOutcome::Conflict => {
                    conflicts += 1;
                    debug!(
                        table = self.table.name(),
                        identity = %self.identity,
                        attempt,
                        "Store conflicted, retrying"
                    );
                }
            }
        }
        Err(self.exceeded("store").into())
    }

    fn evict(&mut self) -> GenetworkResult<bool> {
        self.evict_with(None).map(|(evicted, _)| evicted)
    }

    fn len(&self) -> GenetworkResult<usize> {
        self.table.count(&self.identity)
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}
