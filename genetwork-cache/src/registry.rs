//! Cache registry and handles.
//!
//! The registry is built once at startup from a [`CacheConfig`]. It owns
//! everything shared between caches (access clock, cipher, LMDB
//! environment) and keeps the list of persistent tables so an identity can
//! be dropped from all of them when its session ends.

use std::sync::{Arc, RwLock, Weak};

use genetwork_core::{
    AccessClock, CacheConfig, CacheEntry, CacheKind, ConfigError, GenetworkResult, Identity,
    StorageError,
};
use genetwork_session::{ClientSession, SessionHooks};
use heed::Env;
use tracing::{debug, info};

use crate::cipher::TokenCipher;
use crate::encrypted::EncryptedBackend;
use crate::persistent::{
    open_env, InMemoryRecordTable, LmdbRecordTable, PersistentBackend, RecordTable, MAX_TABLES,
};
use crate::traits::{CacheBackend, CacheCounters, CacheStats, StoreOutcome};
use crate::transparent::TransparentBackend;

/// Partition name of a client-held cache inside the session token.
pub fn partition_name(cache: &str) -> String {
    format!("cache_for_{cache}")
}

/// Table name of the `index`-th persistent cache.
pub fn table_name(index: usize) -> String {
    format!("session_cache_{index}")
}

/// Registry of declared caches.
pub struct CacheRegistry {
    config: CacheConfig,
    clock: Arc<AccessClock>,
    cipher: Option<Arc<TokenCipher>>,
    env: Option<Env>,
    declared: RwLock<Vec<String>>,
    tables: RwLock<Vec<Arc<dyn RecordTable>>>,
}

impl CacheRegistry {
    /// Build a registry for `config`, loading the cipher key and opening the
    /// LMDB environment as the cache kind requires.
    pub fn open(config: CacheConfig) -> GenetworkResult<Self> {
        let cipher = match config.kind {
            CacheKind::Encrypted => Some(TokenCipher::from_config(&config)?),
            _ => None,
        };
        Self::build(config, cipher)
    }

    /// Like [`open`](Self::open) but with explicit key material.
    pub fn with_cipher(config: CacheConfig, cipher: TokenCipher) -> GenetworkResult<Self> {
        Self::build(config, Some(cipher))
    }

    fn build(config: CacheConfig, cipher: Option<TokenCipher>) -> GenetworkResult<Self> {
        config.validate()?;

        let env = match (&config.kind, &config.db_path) {
            (CacheKind::Persistent, Some(path)) => Some(open_env(path, config.map_size_mb)?),
            _ => None,
        };

        info!(
            kind = %config.kind,
            max_size = config.max_size,
            lmdb = env.is_some(),
            "Cache registry opened"
        );

        Ok(Self {
            config,
            clock: Arc::new(AccessClock::new()),
            cipher: cipher.map(Arc::new),
            env,
            declared: RwLock::new(Vec::new()),
            tables: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn kind(&self) -> CacheKind {
        self.config.kind
    }

    /// Declare a cache with the configured capacity.
    pub fn declare(&self, name: &str) -> GenetworkResult<CacheHandle> {
        self.declare_with_capacity(name, self.config.max_size)
    }

    /// Declare a cache with its own capacity.
    pub fn declare_with_capacity(&self, name: &str, max_size: usize) -> GenetworkResult<CacheHandle> {
        if max_size == 0 {
            return Err(invalid_declaration("max_size", max_size, "max_size must be at least 1").into());
        }

        let mut declared = self
            .declared
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if declared.iter().any(|existing| existing == name) {
            return Err(invalid_declaration("name", name, "cache already declared").into());
        }

        let storage = match self.config.kind {
            CacheKind::Transparent => Storage::Transparent,
            CacheKind::Encrypted => {
                let cipher = self.cipher.clone().ok_or_else(|| ConfigError::MissingRequired {
                    field: "aes_key".to_string(),
                })?;
                Storage::Encrypted(cipher)
            }
            CacheKind::Persistent => Storage::Persistent(self.create_table()?),
        };
        declared.push(name.to_string());

        debug!(cache = name, kind = %self.config.kind, max_size, "Declared cache");

        Ok(CacheHandle {
            name: Arc::from(name),
            partition: Arc::from(partition_name(name)),
            max_size,
            max_attempts: self.config.max_attempts,
            clock: self.clock.clone(),
            storage,
            counters: Arc::new(CacheCounters::default()),
        })
    }

    fn create_table(&self) -> GenetworkResult<Arc<dyn RecordTable>> {
        let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        if tables.len() >= MAX_TABLES as usize {
            return Err(invalid_declaration(
                "tables",
                tables.len(),
                "too many persistent caches",
            )
            .into());
        }

        let name = table_name(tables.len());
        let table: Arc<dyn RecordTable> = match &self.env {
            Some(env) => Arc::new(LmdbRecordTable::create(env, name)?),
            None => Arc::new(InMemoryRecordTable::new(name)),
        };
        tables.push(table.clone());
        Ok(table)
    }

    /// Number of persistent tables declared so far.
    pub fn table_count(&self) -> usize {
        self.tables.read().map_or(0, |tables| tables.len())
    }

    /// Remove every persistent row owned by `identity`, across all tables.
    pub fn delete_identity(&self, identity: &Identity) -> GenetworkResult<usize> {
        let tables: Vec<Arc<dyn RecordTable>> = self
            .tables
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .clone();

        let mut deleted = 0;
        for table in &tables {
            deleted += table.delete_identity(identity)?;
        }

        if deleted > 0 {
            info!(%identity, rows = deleted, tables = tables.len(), "Deleted identity cache rows");
        }
        Ok(deleted)
    }

    /// Register [`delete_identity`](Self::delete_identity) on session delete.
    pub fn attach_hooks(self: &Arc<Self>, hooks: &SessionHooks) {
        let weak: Weak<Self> = Arc::downgrade(self);
        hooks.on_delete(move |identity| match weak.upgrade() {
            Some(registry) => registry.delete_identity(identity).map(|_| ()),
            None => Ok(()),
        });
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("kind", &self.config.kind)
            .field("tables", &self.table_count())
            .finish_non_exhaustive()
    }
}

fn invalid_declaration(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// HANDLES
// ============================================================================

#[derive(Clone)]
enum Storage {
    Transparent,
    Encrypted(Arc<TokenCipher>),
    Persistent(Arc<dyn RecordTable>),
}

/// One declared cache. Cheap to clone; clones share statistics.
#[derive(Clone)]
pub struct CacheHandle {
    name: Arc<str>,
    partition: Arc<str>,
    max_size: usize,
    max_attempts: u32,
    clock: Arc<AccessClock>,
    storage: Storage,
    counters: Arc<CacheCounters>,
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partition name used in client-held tokens.
    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn kind(&self) -> CacheKind {
        match self.storage {
            Storage::Transparent => CacheKind::Transparent,
            Storage::Encrypted(_) => CacheKind::Encrypted,
            Storage::Persistent(_) => CacheKind::Persistent,
        }
    }

    /// Persistent table backing this cache, if any.
    pub fn table(&self) -> Option<&Arc<dyn RecordTable>> {
        match &self.storage {
            Storage::Persistent(table) => Some(table),
            _ => None,
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> &CacheCounters {
        &self.counters
    }

    /// Bind the cache to the current session.
    ///
    /// Persistent caches need the session's identity and fail with
    /// `NoIdentity` if it has none.
    pub fn bind<'s>(&'s self, session: &'s mut dyn ClientSession) -> GenetworkResult<BoundBackend<'s>> {
        let backend = match &self.storage {
            Storage::Transparent => BoundBackend::Transparent(self.client_held(session)),
            Storage::Encrypted(cipher) => {
                BoundBackend::Encrypted(EncryptedBackend::new(self.client_held(session), cipher))
            }
            Storage::Persistent(table) => {
                let identity = session.current_identity()?;
                BoundBackend::Persistent(PersistentBackend::new(
                    table.as_ref(),
                    identity,
                    self.max_size,
                    self.max_attempts,
                    &self.clock,
                ))
            }
        };
        Ok(backend)
    }

    fn client_held<'s>(&'s self, session: &'s mut dyn ClientSession) -> TransparentBackend<'s> {
        TransparentBackend::new(session, &self.partition, self.max_size, &self.clock)
    }
}

impl std::fmt::Debug for CacheHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

/// A cache bound to one session for the duration of a call.
pub enum BoundBackend<'s> {
    Transparent(TransparentBackend<'s>),
    Encrypted(EncryptedBackend<'s>),
    Persistent(PersistentBackend<'s>),
}

impl BoundBackend<'_> {
    fn inner(&self) -> &dyn CacheBackend {
        match self {
            BoundBackend::Transparent(b) => b,
            BoundBackend::Encrypted(b) => b,
            BoundBackend::Persistent(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn CacheBackend {
        match self {
            BoundBackend::Transparent(b) => b,
            BoundBackend::Encrypted(b) => b,
            BoundBackend::Persistent(b) => b,
        }
    }
}

impl CacheBackend for BoundBackend<'_> {
    fn lookup(&mut self, key: &str) -> GenetworkResult<Option<CacheEntry>> {
        self.inner_mut().lookup(key)
    }

    fn store(&mut self, key: &str, value: &str) -> GenetworkResult<StoreOutcome> {
        self.inner_mut().store(key, value)
    }

    fn evict(&mut self) -> GenetworkResult<bool> {
        self.inner_mut().evict()
    }

    fn len(&self) -> GenetworkResult<usize> {
        self.inner().len()
    }

    fn touch(&mut self) {
        self.inner_mut().touch();
    }

    fn max_size(&self) -> usize {
        self.inner().max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genetwork_core::{GenetworkError, SessionError, AES_KEY_LEN};
    use genetwork_session::{SessionEvent, SessionToken};

    #[test]
    fn test_names() {
        assert_eq!(partition_name("avatar"), "cache_for_avatar");
        assert_eq!(table_name(3), "session_cache_3");
    }

    #[test]
    fn test_declare_rejects_duplicates_and_zero_capacity() {
        let registry = CacheRegistry::open(CacheConfig::default()).unwrap();
        registry.declare("avatar").unwrap();

        let err = registry.declare("avatar").unwrap_err();
        assert!(matches!(err, GenetworkError::Config(ConfigError::InvalidValue { .. })));

        let err = registry.declare_with_capacity("other", 0).unwrap_err();
        assert!(matches!(err, GenetworkError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_handle_kind_follows_config() {
        for kind in [CacheKind::Transparent, CacheKind::Encrypted, CacheKind::Persistent] {
            let registry = CacheRegistry::open(CacheConfig::for_kind(kind)).unwrap();
            let handle = registry.declare("c").unwrap();
            assert_eq!(handle.kind(), kind);
            assert_eq!(handle.max_size(), kind.default_max_size());
            assert_eq!(handle.table().is_some(), kind == CacheKind::Persistent);
        }
    }

    #[test]
    fn test_persistent_tables_are_numbered() {
        let registry = CacheRegistry::open(CacheConfig::for_kind(CacheKind::Persistent)).unwrap();
        let first = registry.declare("a").unwrap();
        let second = registry.declare("b").unwrap();

        assert_eq!(first.table().unwrap().name(), "session_cache_0");
        assert_eq!(second.table().unwrap().name(), "session_cache_1");
        assert_eq!(registry.table_count(), 2);
    }

    #[test]
    fn test_persistent_bind_requires_identity() {
        let registry = CacheRegistry::open(CacheConfig::for_kind(CacheKind::Persistent)).unwrap();
        let handle = registry.declare("c").unwrap();
        let mut token = SessionToken::new();

        let err = handle.bind(&mut token).err().unwrap();
        assert_eq!(err, GenetworkError::Session(SessionError::NoIdentity));
    }

    #[test]
    fn test_client_held_bind_uses_named_partition() {
        let registry = CacheRegistry::with_cipher(
            CacheConfig::for_kind(CacheKind::Encrypted),
            TokenCipher::new([1u8; AES_KEY_LEN]),
        )
        .unwrap();
        let handle = registry.declare("avatar").unwrap();
        let mut token = SessionToken::new();

        handle.bind(&mut token).unwrap().store("k", "v").unwrap();

        assert_eq!(token.partition("cache_for_avatar").map(|p| p.len()), Some(1));
    }

    #[test]
    fn test_delete_hook_clears_every_table() {
        let registry = Arc::new(
            CacheRegistry::open(CacheConfig::for_kind(CacheKind::Persistent)).unwrap(),
        );
        let hooks = SessionHooks::new();
        registry.attach_hooks(&hooks);

        let first = registry.declare("a").unwrap();
        let second = registry.declare("b").unwrap();
        let identity = Identity::generate();
        let mut token = SessionToken::with_identity(identity.clone());

        first.bind(&mut token).unwrap().store("k", "1").unwrap();
        second.bind(&mut token).unwrap().store("k", "2").unwrap();

        assert_eq!(hooks.trigger(SessionEvent::Delete, &identity), 0);
        assert_eq!(first.bind(&mut token).unwrap().len().unwrap(), 0);
        assert_eq!(second.bind(&mut token).unwrap().len().unwrap(), 0);
    }
}
