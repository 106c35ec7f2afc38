//! Identity-scoped record keys for the persistent tables.
//!
//! `RecordKey` can only be built from an [`Identity`] and a cache key, so
//! every read or write against a table is identity-scoped by construction.
//!
//! # Binary Format
//!
//! - Bytes 0-35: identity (36 ASCII bytes)
//! - Byte 36: separator (0xFF)
//! - Bytes 37..: cache key (UTF-8)
//!
//! Identities are printable ASCII and never contain 0xFF, so the 37-byte
//! prefix of an identity selects exactly that identity's rows in a
//! lexicographically ordered store.

use genetwork_core::{Identity, IDENTITY_LEN};

/// Separator byte between identity and cache key.
const SEPARATOR: u8 = 0xFF;

/// Length of [`RecordKey::identity_prefix`].
pub const PREFIX_LEN: usize = IDENTITY_LEN + 1;

/// Unique `(identity, key)` pair addressing one persistent record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    identity: Identity,
    key: String,
}

impl RecordKey {
    pub fn new(identity: Identity, key: impl Into<String>) -> Self {
        Self {
            identity,
            key: key.into(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Encode for storage: identity, separator, key bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PREFIX_LEN + self.key.len());
        bytes.extend_from_slice(self.identity.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes
    }

    /// Decode a stored key.
    ///
    /// Returns `None` if the separator is missing, the identity is invalid or
    /// the cache key is not UTF-8.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < PREFIX_LEN || bytes[IDENTITY_LEN] != SEPARATOR {
            return None;
        }

        let identity = std::str::from_utf8(&bytes[..IDENTITY_LEN]).ok()?;
        let identity = Identity::new(identity).ok()?;
        let key = std::str::from_utf8(&bytes[PREFIX_LEN..]).ok()?;

        Some(Self::new(identity, key))
    }

    /// Prefix shared by every key of `identity`.
    pub fn identity_prefix(identity: &Identity) -> [u8; PREFIX_LEN] {
        let mut prefix = [0u8; PREFIX_LEN];
        prefix[..IDENTITY_LEN].copy_from_slice(identity.as_bytes());
        prefix[IDENTITY_LEN] = SEPARATOR;
        prefix
    }
}
