//! LMDB-backed record table.
//!
//! Uses the heed crate (Rust bindings for LMDB). All declared caches share
//! one environment; each cache gets its own named database
//! (`session_cache_<index>`).
//!
//! # Concurrency
//!
//! LMDB serializes write transactions. Every conditional write re-reads the
//! row inside its write transaction, so a row that changed since the
//! caller's read is detected before anything is written.

use std::path::Path;

use genetwork_core::{ConfigError, GenetworkResult, Identity, StorageError, Timestamp};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};

use super::record_key::RecordKey;
use super::table::{
    plan_evict, plan_store, pick_oldest, CommitOutcome, EvictCandidate, EvictOutcome,
    PersistentRecord, RecordTable,
};

/// Upper bound on named databases in one environment.
pub const MAX_TABLES: u32 = 128;

/// Open (creating if needed) the LMDB environment at `path`.
pub fn open_env(path: &Path, map_size_mb: usize) -> GenetworkResult<Env> {
    let map_size = map_size_mb
        .checked_mul(1024 * 1024)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: "map_size_mb".to_string(),
            value: map_size_mb.to_string(),
            reason: "map size in bytes overflows usize".to_string(),
        })?;

    std::fs::create_dir_all(path).map_err(|e| StorageError::EnvironmentOpen {
        reason: e.to_string(),
    })?;

    // SAFETY: the environment is opened once per registry and never
    // opened twice in the same process for the same path.
    let env = unsafe {
        EnvOpenOptions::new()
            .map_size(map_size)
            .max_dbs(MAX_TABLES)
            .open(path)
    }
    .map_err(|e| StorageError::EnvironmentOpen {
        reason: e.to_string(),
    })?;

    Ok(env)
}

/// One persistent cache table in an LMDB environment.
pub struct LmdbRecordTable {
    env: Env,
    db: Database<Bytes, Bytes>,
    name: String,
}

impl LmdbRecordTable {
    /// Create or open the named database `name` in `env`.
    pub fn create(env: &Env, name: impl Into<String>) -> GenetworkResult<Self> {
        let name = name.into();

        let mut wtxn = env.write_txn().map_err(txn_failed)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(name.as_str()))
            .map_err(txn_failed)?;
        wtxn.commit().map_err(txn_failed)?;

        Ok(Self {
            env: env.clone(),
            db,
            name,
        })
    }

    fn decode(&self, bytes: &[u8]) -> GenetworkResult<PersistentRecord> {
        serde_json::from_slice(bytes).map_err(|e| {
            StorageError::Corrupted {
                table: self.name.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn encode(&self, record: &PersistentRecord) -> GenetworkResult<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| {
            StorageError::Corrupted {
                table: self.name.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn get(&self, txn: &RoTxn, key: &[u8]) -> GenetworkResult<Option<PersistentRecord>> {
        match self.db.get(txn, key).map_err(txn_failed)? {
            Some(bytes) => self.decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Encoded keys and records of one identity.
    ///
    /// Every stored key must decode to this identity and to the key held in
    /// its record; anything else is reported as corruption.
    fn scan(
        &self,
        txn: &RoTxn,
        identity: &Identity,
    ) -> GenetworkResult<Vec<(Vec<u8>, PersistentRecord)>> {
        let prefix = RecordKey::identity_prefix(identity);
        let iter = self.db.prefix_iter(txn, &prefix).map_err(txn_failed)?;

        let mut rows = Vec::new();
        for result in iter {
            let (key, bytes) = result.map_err(txn_failed)?;
            let record = self.decode(bytes)?;
            match RecordKey::decode(key) {
                Some(stored)
                    if stored.identity() == identity
                        && stored.key() == record.key
                        && record.identity == *identity => {}
                _ => {
                    return Err(StorageError::Corrupted {
                        table: self.name.clone(),
                        reason: format!("malformed record key {}", String::from_utf8_lossy(key)),
                    }
                    .into())
                }
            }
            rows.push((key.to_vec(), record));
        }
        Ok(rows)
    }
}

impl RecordTable for LmdbRecordTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, identity: &Identity, key: &str) -> GenetworkResult<Option<PersistentRecord>> {
        let encoded = RecordKey::new(identity.clone(), key).encode();
        let rtxn = self.env.read_txn().map_err(txn_failed)?;
        self.get(&rtxn, &encoded)
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
        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;

        let current = self.get(&wtxn, &encoded)?;
        let Some((record, inserted)) = plan_store(current, identity, key, value, at, expected)
        else {
            wtxn.abort();
            return Ok(CommitOutcome::Conflict);
        };

        let bytes = self.encode(&record)?;
        self.db
            .put(&mut wtxn, &encoded, &bytes)
            .map_err(txn_failed)?;
        wtxn.commit().map_err(txn_failed)?;

        Ok(CommitOutcome::Committed { inserted })
    }

    fn count(&self, identity: &Identity) -> GenetworkResult<usize> {
        let prefix = RecordKey::identity_prefix(identity);
        let rtxn = self.env.read_txn().map_err(txn_failed)?;
        let count = self
            .db
            .prefix_iter(&rtxn, &prefix)
            .map_err(txn_failed)?
            .count();
        Ok(count)
    }

    fn oldest(&self, identity: &Identity) -> GenetworkResult<Option<EvictCandidate>> {
        let rtxn = self.env.read_txn().map_err(txn_failed)?;
        let rows = self.scan(&rtxn, identity)?;
        Ok(pick_oldest(rows.iter().map(|(_, r)| r)))
    }

    fn evict_if_unchanged(
        &self,
        identity: &Identity,
        candidate: &EvictCandidate,
        capacity: Option<usize>,
    ) -> GenetworkResult<EvictOutcome> {
        let encoded = RecordKey::new(identity.clone(), candidate.key.as_str()).encode();
        let prefix = RecordKey::identity_prefix(identity);
        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;

        let count = self
            .db
            .prefix_iter(&wtxn, &prefix)
            .map_err(txn_failed)?
            .count();
        let current = self.get(&wtxn, &encoded)?;

        let outcome = plan_evict(current.as_ref(), candidate, count, capacity);
        if outcome == EvictOutcome::Evicted {
            self.db.delete(&mut wtxn, &encoded).map_err(txn_failed)?;
            wtxn.commit().map_err(txn_failed)?;
        } else {
            wtxn.abort();
        }
        Ok(outcome)
    }

    fn delete_identity(&self, identity: &Identity) -> GenetworkResult<usize> {
        let mut wtxn = self.env.write_txn().map_err(txn_failed)?;

        let doomed: Vec<Vec<u8>> = self
            .scan(&wtxn, identity)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        let mut deleted = 0usize;
        for key in &doomed {
            if self.db.delete(&mut wtxn, key).map_err(txn_failed)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_failed)?;

        Ok(deleted)
    }
}

impl std::fmt::Debug for LmdbRecordTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbRecordTable")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

fn txn_failed(e: heed::Error) -> genetwork_core::GenetworkError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
    .into()
}
