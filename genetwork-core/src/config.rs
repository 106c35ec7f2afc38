//! Configuration types
//!
//! Loaded from environment variables with defaults, in the same shape as the
//! deployment settings: one cache kind for the whole process, a capacity per
//! identity, and the storage locations each kind needs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, GenetworkResult};

/// Default per-identity capacity for client-held caches.
pub const DEFAULT_CLIENT_MAX_SIZE: usize = 10;
/// Default per-identity capacity for the persistent cache.
pub const DEFAULT_PERSISTENT_MAX_SIZE: usize = 64;
/// Default bound on optimistic-concurrency attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
/// Default LMDB map size.
pub const DEFAULT_MAP_SIZE_MB: usize = 64;
/// Required AES key length in bytes.
pub const AES_KEY_LEN: usize = 32;

const TRANSPARENT_NAMES: &[&str] = &["transparent", "flask", "default", "cookie", "easy"];
const ENCRYPTED_NAMES: &[&str] = &["encrypted", "aes", "encrypt", "medium", "normal"];
const PERSISTENT_NAMES: &[&str] = &["persistent", "sql", "sqlalchemy", "hard", "lmdb"];

/// Which storage strategy backs every declared cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// Plain entries inside the client-held token.
    Transparent,
    /// AES-CTR encrypted entries inside the client-held token.
    Encrypted,
    /// Server-side table partitioned by identity.
    Persistent,
}

impl CacheKind {
    /// Whether entries live in the client-held token.
    pub fn is_client_held(self) -> bool {
        !matches!(self, CacheKind::Persistent)
    }

    pub fn default_max_size(self) -> usize {
        match self {
            CacheKind::Transparent | CacheKind::Encrypted => DEFAULT_CLIENT_MAX_SIZE,
            CacheKind::Persistent => DEFAULT_PERSISTENT_MAX_SIZE,
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheKind::Transparent => "transparent",
            CacheKind::Encrypted => "encrypted",
            CacheKind::Persistent => "persistent",
        };
        f.write_str(name)
    }
}

impl FromStr for CacheKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        if TRANSPARENT_NAMES.contains(&name.as_str()) {
            Ok(CacheKind::Transparent)
        } else if ENCRYPTED_NAMES.contains(&name.as_str()) {
            Ok(CacheKind::Encrypted)
        } else if PERSISTENT_NAMES.contains(&name.as_str()) {
            Ok(CacheKind::Persistent)
        } else {
            Err(ConfigError::InvalidValue {
                field: "kind".to_string(),
                value: s.to_string(),
                reason: "unknown cache kind".to_string(),
            })
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Storage strategy for every declared cache.
    pub kind: CacheKind,
    /// Per-identity entry limit applied to caches declared without their own.
    pub max_size: usize,
    /// File holding the 32-byte AES key. Unset means a random key per process.
    pub aes_key_file: Option<PathBuf>,
    /// LMDB directory for the persistent tables. Unset means in-memory tables.
    pub db_path: Option<PathBuf>,
    /// LMDB map size in megabytes.
    pub map_size_mb: usize,
    /// Bound on optimistic-concurrency attempts per store or eviction.
    pub max_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::for_kind(CacheKind::Transparent)
    }
}

impl CacheConfig {
    /// Defaults for the given kind.
    pub fn for_kind(kind: CacheKind) -> Self {
        Self {
            kind,
            max_size: kind.default_max_size(),
            aes_key_file: None,
            db_path: None,
            map_size_mb: DEFAULT_MAP_SIZE_MB,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the per-identity capacity (builder pattern).
    #[must_use]
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the LMDB directory (builder pattern).
    #[must_use]
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Set the AES key file (builder pattern).
    #[must_use]
    pub fn aes_key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.aes_key_file = Some(path.into());
        self
    }

    /// Set the retry bound (builder pattern).
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `GENETWORK_CACHE_KIND`: cache kind name (default: transparent)
    /// - `GENETWORK_CACHE_MAX_SIZE`: per-identity capacity (default: 10, or 64 for persistent)
    /// - `GENETWORK_AES_KEY_FILE`: path to a 32-byte key file
    /// - `GENETWORK_CACHE_DB_PATH`: LMDB directory for persistent tables
    /// - `GENETWORK_CACHE_DB_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `GENETWORK_CACHE_MAX_ATTEMPTS`: retry bound (default: 8)
    pub fn from_env() -> GenetworkResult<Self> {
        let kind = match std::env::var("GENETWORK_CACHE_KIND") {
            Ok(raw) => raw.parse()?,
            Err(_) => CacheKind::Transparent,
        };
        let defaults = Self::for_kind(kind);

        let config = Self {
            kind,
            max_size: env_parse("GENETWORK_CACHE_MAX_SIZE")?.unwrap_or(defaults.max_size),
            aes_key_file: std::env::var("GENETWORK_AES_KEY_FILE").ok().map(PathBuf::from),
            db_path: std::env::var("GENETWORK_CACHE_DB_PATH").ok().map(PathBuf::from),
            map_size_mb: env_parse("GENETWORK_CACHE_DB_MAP_SIZE_MB")?
                .unwrap_or(defaults.map_size_mb),
            max_attempts: env_parse("GENETWORK_CACHE_MAX_ATTEMPTS")?
                .unwrap_or(defaults.max_attempts),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - max_size >= 1
    /// - max_attempts >= 1
    /// - map_size_mb >= 1
    pub fn validate(&self) -> GenetworkResult<()> {
        if self.max_size == 0 {
            return Err(invalid("max_size", self.max_size, "max_size must be at least 1").into());
        }

        if self.max_attempts == 0 {
            return Err(invalid(
                "max_attempts",
                self.max_attempts,
                "max_attempts must be at least 1",
            )
            .into());
        }

        if self.map_size_mb == 0 {
            return Err(invalid(
                "map_size_mb",
                self.map_size_mb,
                "map_size_mb must be at least 1",
            )
            .into());
        }

        Ok(())
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a session is torn down.
    pub session_duration: Duration,
    /// Time between reaper sweeps.
    pub clean_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_duration: Duration::from_secs(20 * 60),
            clean_interval: Duration::from_secs(15 * 60),
        }
    }
}

impl SessionConfig {
    /// Load from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `GENETWORK_SESSION_DURATION_SECS` (default: 1200)
    /// - `GENETWORK_SESSION_CLEAN_INTERVAL_SECS` (default: 900)
    pub fn from_env() -> GenetworkResult<Self> {
        let defaults = Self::default();
        let config = Self {
            session_duration: env_parse("GENETWORK_SESSION_DURATION_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_duration),
            clean_interval: env_parse("GENETWORK_SESSION_CLEAN_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.clean_interval),
        };

        if config.clean_interval.is_zero() {
            return Err(invalid(
                "clean_interval",
                format!("{:?}", config.clean_interval),
                "clean_interval must be positive",
            )
            .into());
        }

        Ok(config)
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse an optional environment variable, rejecting malformed values.
fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(name, raw, "not a valid number")),
        Err(_) => Ok(None),
    }
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Display output always parses back to the same kind.
        #[test]
        fn prop_kind_display_parses_back(kind in prop_oneof![
            Just(CacheKind::Transparent),
            Just(CacheKind::Encrypted),
            Just(CacheKind::Persistent),
        ]) {
            prop_assert_eq!(kind.to_string().parse::<CacheKind>().unwrap(), kind);
        }
    }
}
