//! Encrypted client-held backend.
//!
//! Keys and values are encrypted independently before they reach the token,
//! so every lookup has to decrypt stored keys until one matches. The
//! partition never holds more than `max_size` entries, which bounds the scan.

use genetwork_core::{CacheEntry, GenetworkResult};
use tracing::warn;

use crate::cipher::TokenCipher;
use crate::traits::{CacheBackend, StoreOutcome};
use crate::transparent::TransparentBackend;

/// Wraps [`TransparentBackend`], encrypting key and value of every entry.
pub struct EncryptedBackend<'s> {
    inner: TransparentBackend<'s>,
    cipher: &'s TokenCipher,
}

impl<'s> EncryptedBackend<'s> {
    pub fn new(inner: TransparentBackend<'s>, cipher: &'s TokenCipher) -> Self {
        Self { inner, cipher }
    }

    /// Stored (encrypted) key and entry whose key decrypts to `key`.
    ///
    /// Entries that fail to decrypt are skipped.
    fn find_slot(&self, key: &str) -> Option<(String, CacheEntry)> {
        let partition = self.inner.entries()?;
        partition.iter().find_map(|(stored_key, entry)| {
            match self.cipher.decrypt(stored_key) {
                Ok(plain) if plain == key => Some((stored_key.clone(), entry.clone())),
                Ok(_) => None,
                Err(e) => {
                    warn!(
                        partition = self.inner.partition_name(),
                        error = %e,
                        "Skipping undecryptable cache key"
                    );
                    None
                }
            }
        })
    }
}

impl CacheBackend for EncryptedBackend<'_> {
    fn lookup(&mut self, key: &str) -> GenetworkResult<Option<CacheEntry>> {
        let Some((_, entry)) = self.find_slot(key) else {
            return Ok(None);
        };

        match self.cipher.decrypt(&entry.value) {
            Ok(value) => Ok(Some(CacheEntry::new(value, entry.last_access))),
            Err(e) => {
                warn!(
                    partition = self.inner.partition_name(),
                    error = %e,
                    "Undecryptable cache value treated as a miss"
                );
                Ok(None)
            }
        }
    }

    fn store(&mut self, key: &str, value: &str) -> GenetworkResult<StoreOutcome> {
        let slot = match self.find_slot(key) {
            Some((stored_key, _)) => stored_key,
            None => self.cipher.encrypt(key)?,
        };
        let sealed = self.cipher.encrypt(value)?;
        self.inner.store(&slot, &sealed)
    }

    fn evict(&mut self) -> GenetworkResult<bool> {
        self.inner.evict()
    }

    fn len(&self) -> GenetworkResult<usize> {
        self.inner.len()
    }

    fn touch(&mut self) {
        self.inner.touch();
    }

    fn max_size(&self) -> usize {
        self.inner.max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use genetwork_core::{AccessClock, Identity, AES_KEY_LEN};
    use genetwork_session::{ClientSession, SessionToken};

    const PARTITION: &str = "cache_for_secret";

    fn backend<'s>(
        token: &'s mut SessionToken,
        clock: &'s AccessClock,
        cipher: &'s TokenCipher,
        max_size: usize,
    ) -> EncryptedBackend<'s> {
        EncryptedBackend::new(
            TransparentBackend::new(token, PARTITION, max_size, clock),
            cipher,
        )
    }

    #[test]
    fn test_store_and_lookup() {
        let clock = AccessClock::new();
        let cipher = TokenCipher::random();
        let mut token = SessionToken::with_identity(Identity::generate());
        let mut cache = backend(&mut token, &clock, &cipher, 4);

        cache.store("(1)", "one").unwrap();
        assert_eq!(cache.lookup("(1)").unwrap().unwrap().value, "one");
        assert!(cache.lookup("(2)").unwrap().is_none());
    }

    #[test]
    fn test_token_holds_no_plaintext() {
        let clock = AccessClock::new();
        let cipher = TokenCipher::random();
        let mut token = SessionToken::with_identity(Identity::generate());
        backend(&mut token, &clock, &cipher, 4)
            .store("visible-key", "visible-value")
            .unwrap();

        let raw = token.to_json().unwrap();
        assert!(!raw.contains("visible-key"));
        assert!(!raw.contains("visible-value"));
    }

    #[test]
    fn test_restore_reuses_slot() {
        let clock = AccessClock::new();
        let cipher = TokenCipher::random();
        let mut token = SessionToken::with_identity(Identity::generate());
        let mut cache = backend(&mut token, &clock, &cipher, 4);

        cache.store("k", "v1").unwrap();
        cache.store("k", "v2").unwrap();

        assert_eq!(cache.len().unwrap(), 1);
        assert_eq!(cache.lookup("k").unwrap().unwrap().value, "v2");
    }

    #[test]
    fn test_eviction_order_matches_plain_backend() {
        let clock = AccessClock::new();
        let cipher = TokenCipher::random();
        let mut token = SessionToken::with_identity(Identity::generate());
        let mut cache = backend(&mut token, &clock, &cipher, 2);

        cache.store("a", "1").unwrap();
        cache.store("b", "2").unwrap();
        cache.store("c", "3").unwrap();

        assert!(cache.lookup("a").unwrap().is_none());
        assert!(cache.lookup("b").unwrap().is_some());
        assert!(cache.lookup("c").unwrap().is_some());
    }

    #[test]
    fn test_corrupted_entries_are_misses() {
        let clock = AccessClock::new();
        let cipher = TokenCipher::new([5u8; AES_KEY_LEN]);
        let mut token = SessionToken::with_identity(Identity::generate());
        backend(&mut token, &clock, &cipher, 4).store("good", "v").unwrap();

        // Garbage key and a good key whose value is garbage.
        let good_key = token
            .partition(PARTITION)
            .and_then(|p| p.keys().next().cloned())
            .unwrap();
        let partition = token.partition_mut(PARTITION);
        partition.insert("not,base64!".to_string(), CacheEntry::new("x", Utc::now()));
        partition.get_mut(&good_key).unwrap().value = "AAAAAAAAAAA=,***".to_string();

        let mut cache = backend(&mut token, &clock, &cipher, 4);
        assert!(cache.lookup("good").unwrap().is_none());
        assert!(cache.lookup("other").unwrap().is_none());
    }
}
