//! Genetwork Cache - Per-Identity Memoizing LRU
//!
//! Memoizes a deterministic producer per client identity, with one of three
//! storage strategies chosen once at startup:
//!
//! - `Transparent`: plain entries inside the client-held session token
//! - `Encrypted`: AES-256-CTR encrypted entries inside the session token
//! - `Persistent`: server-side record table (LMDB or in-memory), one row per
//!   `(identity, key)`, written with bounded optimistic-concurrency retries
//!
//! # Usage
//!
//! ```text
//! let registry = Arc::new(CacheRegistry::open(CacheConfig::from_env()?)?);
//! registry.attach_hooks(&hooks);
//! let avatar = memoize(render_avatar, registry.declare("avatar")?);
//! let svg = avatar.call(&mut token, &seed)?;
//! ```
//!
//! Every backend keeps a partition at or below its capacity after each
//! store, evicting the entry with the oldest access time.

pub mod cipher;
pub mod codec;
pub mod encrypted;
pub mod key;
pub mod lru;
pub mod memoize;
pub mod persistent;
pub mod registry;
pub mod traits;
pub mod transparent;

pub use cipher::TokenCipher;
pub use codec::{JsonCodec, PlainText, ValueCodec};
pub use encrypted::EncryptedBackend;
pub use key::{canonicalize, CallArgs};
pub use memoize::{memoize, memoize_json, Memoized};
pub use persistent::{
    open_env, CommitOutcome, EvictCandidate, EvictOutcome, InMemoryRecordTable, LmdbRecordTable,
    PersistentBackend, PersistentRecord, RecordKey, RecordTable,
};
pub use registry::{partition_name, table_name, BoundBackend, CacheHandle, CacheRegistry};
pub use traits::{CacheBackend, CacheCounters, CacheStats, StoreOutcome};
pub use transparent::TransparentBackend;
