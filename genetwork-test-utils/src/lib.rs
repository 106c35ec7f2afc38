//! Genetwork Test Utilities
//!
//! Shared test infrastructure for the genetwork workspace:
//! - Proptest generators for identities, keys and values
//! - Fixtures for sessions and registries of every cache kind
//! - A counting producer and fault-injecting record table
//! - Assertions for genetwork error variants

pub use genetwork_cache::{CacheHandle, CacheRegistry, InMemoryRecordTable, RecordTable};
pub use genetwork_core::{
    CacheConfig, CacheKind, GenetworkError, GenetworkResult, Identity, SessionError, StorageError,
    IDENTITY_LEN,
};
pub use genetwork_session::SessionToken;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid fixed-length identity.
    pub fn arb_identity() -> impl Strategy<Value = Identity> {
        "[a-z0-9]{36}".prop_filter_map("identity", |raw| Identity::new(raw).ok())
    }

    /// Generate a short cache key.
    pub fn arb_cache_key() -> impl Strategy<Value = String> {
        "[a-z]{1,6}"
    }

    /// Generate an arbitrary stored value, including non-ASCII text.
    pub fn arb_value() -> impl Strategy<Value = String> {
        any::<String>()
    }

    /// Generate a client-held cache kind.
    pub fn arb_client_kind() -> impl Strategy<Value = CacheKind> {
        prop_oneof![Just(CacheKind::Transparent), Just(CacheKind::Encrypted)]
    }

    /// Generate any cache kind.
    pub fn arb_cache_kind() -> impl Strategy<Value = CacheKind> {
        prop_oneof![
            Just(CacheKind::Transparent),
            Just(CacheKind::Encrypted),
            Just(CacheKind::Persistent),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common cache scenarios.

    use super::*;
    use tempfile::TempDir;

    /// Identity derived from a short readable name, padded to full length.
    pub fn named_identity(name: &str) -> Identity {
        let raw = format!("{name:-<width$}", width = IDENTITY_LEN);
        match Identity::new(raw) {
            Ok(identity) => identity,
            Err(e) => panic!("invalid fixture identity {name:?}: {e}"),
        }
    }

    /// Session token carrying `identity`.
    pub fn session_for(identity: &Identity) -> SessionToken {
        SessionToken::with_identity(identity.clone())
    }

    /// Registry of `kind` with in-memory persistent tables.
    pub fn registry(kind: CacheKind, max_size: usize) -> Arc<CacheRegistry> {
        match CacheRegistry::open(CacheConfig::for_kind(kind).max_size(max_size)) {
            Ok(registry) => Arc::new(registry),
            Err(e) => panic!("failed to open {kind} registry: {e}"),
        }
    }

    /// Persistent registry backed by LMDB in a fresh temp directory.
    ///
    /// Keep the returned `TempDir` alive for as long as the registry is used.
    pub fn lmdb_registry(max_size: usize) -> (Arc<CacheRegistry>, TempDir) {
        let dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(e) => panic!("failed to create temp dir: {e}"),
        };
        let config = CacheConfig::for_kind(CacheKind::Persistent)
            .max_size(max_size)
            .db_path(dir.path());
        match CacheRegistry::open(config) {
            Ok(registry) => (Arc::new(registry), dir),
            Err(e) => panic!("failed to open LMDB registry: {e}"),
        }
    }

    /// Declare `name` on `registry`.
    pub fn declare(registry: &CacheRegistry, name: &str) -> CacheHandle {
        match registry.declare(name) {
            Ok(handle) => handle,
            Err(e) => panic!("failed to declare {name}: {e}"),
        }
    }
}

// ============================================================================
// PRODUCERS AND FAULTY TABLES
// ============================================================================

/// Deterministic producer that counts how often it runs.
#[derive(Debug, Clone, Default)]
pub struct CountingProducer {
    calls: Arc<AtomicUsize>,
}

impl CountingProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closure rendering `prefix:arg`, counted on this producer.
    pub fn render(&self, prefix: &str) -> impl Fn(&str) -> String + Send + Sync + 'static {
        let calls = self.calls.clone();
        let prefix = prefix.to_string();
        move |arg: &str| {
            calls.fetch_add(1, Ordering::SeqCst);
            format!("{prefix}:{arg}")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Record table that refuses every conditional write with a conflict.
///
/// Reads go to an in-memory table, so callers see a consistent but
/// permanently contended partition.
#[derive(Debug, Clone)]
pub struct ContendedTable {
    inner: InMemoryRecordTable,
    commits: Arc<AtomicUsize>,
}

impl ContendedTable {
    pub fn new(name: &str) -> Self {
        Self {
            inner: InMemoryRecordTable::new(name),
            commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of refused writes.
    pub fn refused(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl RecordTable for ContendedTable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn find(
        &self,
        identity: &Identity,
        key: &str,
    ) -> GenetworkResult<Option<genetwork_cache::PersistentRecord>> {
        self.inner.find(identity, key)
    }

    fn commit_store(
        &self,
        _identity: &Identity,
        _key: &str,
        _value: &str,
        _at: genetwork_core::Timestamp,
        _expected: Option<u64>,
    ) -> GenetworkResult<genetwork_cache::CommitOutcome> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(genetwork_cache::CommitOutcome::Conflict)
    }

    fn count(&self, identity: &Identity) -> GenetworkResult<usize> {
        self.inner.count(identity)
    }

    fn oldest(&self, identity: &Identity) -> GenetworkResult<Option<genetwork_cache::EvictCandidate>> {
        self.inner.oldest(identity)
    }

    fn evict_if_unchanged(
        &self,
        _identity: &Identity,
        _candidate: &genetwork_cache::EvictCandidate,
        _capacity: Option<usize>,
    ) -> GenetworkResult<genetwork_cache::EvictOutcome> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(genetwork_cache::EvictOutcome::Stale)
    }

    fn delete_identity(&self, identity: &Identity) -> GenetworkResult<usize> {
        self.inner.delete_identity(identity)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for genetwork-specific validation.

    use super::*;

    /// Assert that a GenetworkResult is a NoIdentity session error.
    #[track_caller]
    pub fn assert_no_identity<T: std::fmt::Debug>(result: &GenetworkResult<T>) {
        match result {
            Err(GenetworkError::Session(SessionError::NoIdentity)) => {}
            other => panic!("Expected NoIdentity error, got: {:?}", other),
        }
    }

    /// Assert that a GenetworkResult is a ConflictExceeded error for `operation`.
    #[track_caller]
    pub fn assert_conflict_exceeded<T: std::fmt::Debug>(
        result: &GenetworkResult<T>,
        operation: &str,
        attempts: u32,
    ) {
        match result {
            Err(GenetworkError::Storage(StorageError::ConflictExceeded {
                operation: op,
                attempts: a,
            })) => {
                assert_eq!(op, operation, "Wrong operation in ConflictExceeded");
                assert_eq!(*a, attempts, "Wrong attempt count in ConflictExceeded");
            }
            other => panic!("Expected ConflictExceeded for {operation}, got: {:?}", other),
        }
    }

    /// Assert that a Config error was returned.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &GenetworkResult<T>) {
        match result {
            Err(GenetworkError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a partition size respects the capacity.
    #[track_caller]
    pub fn assert_within_capacity(len: usize, max_size: usize) {
        assert!(
            len <= max_size,
            "Partition holds {} entries, capacity is {}",
            len,
            max_size
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
