//! In-memory record table.
//!
//! Used when no database path is configured, and in tests. Rows are kept in
//! a `BTreeMap` under the same encoded [`RecordKey`] the LMDB table uses, so
//! identity scans are prefix range scans in both engines.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use genetwork_core::{GenetworkResult, Identity, StorageError, Timestamp};

use super::record_key::RecordKey;
use super::table::{
    plan_evict, plan_store, pick_oldest, CommitOutcome, EvictCandidate, EvictOutcome,
    PersistentRecord, RecordTable,
};

type Rows = BTreeMap<Vec<u8>, PersistentRecord>;

/// Record table held in process memory.
#[derive(Debug, Clone)]
pub struct InMemoryRecordTable {
    name: String,
    rows: Arc<RwLock<Rows>>,
}

impl InMemoryRecordTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Total rows across all identities.
    pub fn total_rows(&self) -> GenetworkResult<usize> {
        Ok(self.read()?.len())
    }

    fn read(&self) -> GenetworkResult<RwLockReadGuard<'_, Rows>> {
        self.rows
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> GenetworkResult<RwLockWriteGuard<'_, Rows>> {
        self.rows
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }
}

fn identity_rows<'a>(
    rows: &'a Rows,
    identity: &Identity,
) -> impl Iterator<Item = (&'a Vec<u8>, &'a PersistentRecord)> {
    let prefix = RecordKey::identity_prefix(identity);
    rows.range(prefix.to_vec()..)
        .take_while(move |(key, _)| key.starts_with(&prefix))
}

impl RecordTable for InMemoryRecordTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, identity: &Identity, key: &str) -> GenetworkResult<Option<PersistentRecord>> {
        let encoded = RecordKey::new(identity.clone(), key).encode();
        Ok(self.read()?.get(&encoded).cloned())
    }

    fn commit_store(
        &self,
        identity: &Identity,
        key: &str,
        value: &str,
        at: Timestamp,
        expected: Option<u64>,
    ) -> GenetworkResult<CommitOutcome> {
        let encoded = RecordKey::new(identity.clone(), key).encode();
        let mut rows = self.write()?;

        let current = rows.get(&encoded).cloned();
        match plan_store(current, identity, key, value, at, expected) {
            Some((record, inserted)) => {
                rows.insert(encoded, record);
                Ok(CommitOutcome::Committed { inserted })
            }
            None => Ok(CommitOutcome::Conflict),
        }
    }

    fn count(&self, identity: &Identity) -> GenetworkResult<usize> {
        Ok(identity_rows(&*self.read()?, identity).count())
    }

    fn oldest(&self, identity: &Identity) -> GenetworkResult<Option<EvictCandidate>> {
        let rows = self.read()?;
        Ok(pick_oldest(identity_rows(&rows, identity).map(|(_, r)| r)))
    }

    fn evict_if_unchanged(
        &self,
        identity: &Identity,
        candidate: &EvictCandidate,
        capacity: Option<usize>,
    ) -> GenetworkResult<EvictOutcome> {
        let encoded = RecordKey::new(identity.clone(), candidate.key.as_str()).encode();
        let mut rows = self.write()?;

        let count = identity_rows(&rows, identity).count();
        let outcome = plan_evict(rows.get(&encoded), candidate, count, capacity);
        if outcome == EvictOutcome::Evicted {
            rows.remove(&encoded);
        }
        Ok(outcome)
    }

    fn delete_identity(&self, identity: &Identity) -> GenetworkResult<usize> {
        let mut rows = self.write()?;
        let doomed: Vec<Vec<u8>> = identity_rows(&rows, identity)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            rows.remove(key);
        }
        Ok(doomed.len())
    }
}
