//! Error types for genetwork operations

use thiserror::Error;

/// Session and identity errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No session identity present")]
    NoIdentity,

    #[error("Invalid session identity: {reason}")]
    InvalidIdentity { reason: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Conflict retry bound exceeded for {operation} after {attempts} attempts")]
    ConflictExceeded { operation: String, attempts: u32 },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Failed to open storage environment: {reason}")]
    EnvironmentOpen { reason: String },

    #[error("Corrupted record in {table}: {reason}")]
    Corrupted { table: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Value and token encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Decryption failed: {reason}")]
    Decryption { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all genetwork errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenetworkError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl GenetworkError {
    /// True for failures a caller may retry later (contention, not bad input).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenetworkError::Storage(StorageError::ConflictExceeded { .. })
        )
    }
}

/// Result type alias for genetwork operations.
pub type GenetworkResult<T> = Result<T, GenetworkError>;

// =============================================================================
// TESTS
// =============================================================================
