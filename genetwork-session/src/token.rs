//! Client-held session token.
//!
//! The token is the mapping that travels to the client inside a signed
//! cookie. Signing and transport belong to the surrounding web layer; this
//! type only models the payload and tracks whether it has to be re-issued.

use std::collections::{BTreeSet, HashMap};

use genetwork_core::{CodecError, Identity, Partition, SessionError};
use serde::{Deserialize, Serialize};

/// Source of the identity for the request being handled.
pub trait IdentityProvider {
    /// The current identity, or `NoIdentity` if none was issued yet.
    fn current_identity(&self) -> Result<Identity, SessionError>;
}

/// Mutable view of the client-held container used by the client-held caches.
///
/// Reads go through [`partition`](Self::partition) and never flag the token.
/// Writers call [`mark_modified`](Self::mark_modified) once they have changed
/// a partition so the transport layer knows to re-serialize the token.
pub trait ClientSession: IdentityProvider {
    /// Read-only access to a named partition.
    fn partition(&self, name: &str) -> Option<&Partition>;

    /// Mutable access to a named partition, created empty on first use.
    fn partition_mut(&mut self, name: &str) -> &mut Partition;

    /// Flag the named partition as changed.
    fn mark_modified(&mut self, name: &str);
}

/// Serializable token payload: the session identity plus one partition per
/// client-held cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionToken {
    #[serde(rename = "SessionId", default, skip_serializing_if = "Option::is_none")]
    identity: Option<Identity>,

    #[serde(default)]
    caches: HashMap<String, Partition>,

    #[serde(skip)]
    modified: BTreeSet<String>,

    #[serde(skip)]
    identity_modified: bool,
}

impl SessionToken {
    /// An empty token with no identity, as sent by a first-time client.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token already carrying an identity.
    pub fn with_identity(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            ..Self::default()
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Attach a newly issued identity.
    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.identity_modified = true;
    }

    /// Whether anything in the token changed since it was decoded.
    pub fn is_modified(&self) -> bool {
        self.identity_modified || !self.modified.is_empty()
    }

    /// Names of partitions flagged during this request.
    pub fn modified_partitions(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(String::as_str)
    }

    /// Reset change tracking after the token has been re-issued.
    pub fn clear_modified(&mut self) {
        self.modified.clear();
        self.identity_modified = false;
    }

    /// Serialize the payload for the signing layer.
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::Serialization {
            reason: e.to_string(),
        })
    }

    /// Decode a payload handed back by the signing layer.
    pub fn from_json(raw: &str) -> Result<Self, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError::Serialization {
            reason: e.to_string(),
        })
    }
}

impl IdentityProvider for SessionToken {
    fn current_identity(&self) -> Result<Identity, SessionError> {
        self.identity.clone().ok_or(SessionError::NoIdentity)
    }
}

impl ClientSession for SessionToken {
    fn partition(&self, name: &str) -> Option<&Partition> {
        self.caches.get(name)
    }

    fn partition_mut(&mut self, name: &str) -> &mut Partition {
        self.caches.entry(name.to_string()).or_default()
    }

    fn mark_modified(&mut self, name: &str) {
        self.modified.insert(name.to_string());
    }
}
