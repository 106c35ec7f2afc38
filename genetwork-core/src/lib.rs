//! Genetwork Core - Shared Types
//!
//! Identity, time, error and configuration types used by every other
//! genetwork crate. This crate contains no storage or cache logic.

mod config;
mod entry;
mod error;
mod identity;

pub use config::{
    CacheConfig, CacheKind, SessionConfig, AES_KEY_LEN, DEFAULT_CLIENT_MAX_SIZE,
    DEFAULT_MAP_SIZE_MB, DEFAULT_MAX_ATTEMPTS, DEFAULT_PERSISTENT_MAX_SIZE,
};
pub use entry::{CacheEntry, Partition};
pub use error::{
    CodecError, ConfigError, GenetworkError, GenetworkResult, SessionError, StorageError,
};
pub use identity::{AccessClock, Identity, Timestamp, IDENTITY_LEN};
