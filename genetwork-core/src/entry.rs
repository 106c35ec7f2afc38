//! Cache entry data model shared by the token container and the backends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// One cached value and the time it was last read or written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub last_access: Timestamp,
    pub value: String,
}

impl CacheEntry {
    pub fn new(value: impl Into<String>, last_access: Timestamp) -> Self {
        Self {
            last_access,
            value: value.into(),
        }
    }
}

/// One identity's entries for one cache, keyed by the canonical call key.
pub type Partition = HashMap<String, CacheEntry>;
