//! Memoizing wrapper around a deterministic producer.
//!
//! ```text
//! call(session, args)
//!   key = key_fn(args)
//!   bind handle to session, touch
//!   hit  → store(key, stored)        → decode(stored)
//!   miss → result = f(args)
//!          store(key, encode(result)) → result
//! ```
//!
//! A miss returns the producer's own value, not `decode(encode(result))`.
//! With a lossy codec the first call and later calls can differ.

use genetwork_core::{CodecError, GenetworkResult};
use genetwork_session::ClientSession;
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

use crate::codec::{JsonCodec, PlainText, ValueCodec};
use crate::key::canonicalize;
use crate::registry::CacheHandle;
use crate::traits::CacheBackend;

type Producer<A, V> = Box<dyn Fn(&A) -> V + Send + Sync>;
type KeyFn<A> = Box<dyn Fn(&A) -> Result<String, CodecError> + Send + Sync>;

/// Memoize a `String`-producing function, storing results as-is.
pub fn memoize<A, F>(f: F, handle: CacheHandle) -> Memoized<A, String>
where
    A: Serialize + ?Sized,
    F: Fn(&A) -> String + Send + Sync + 'static,
{
    Memoized::new(f, handle, PlainText)
}

/// Memoize any serde-serializable result, storing it as JSON.
pub fn memoize_json<A, V, F>(f: F, handle: CacheHandle) -> Memoized<A, V>
where
    A: Serialize + ?Sized,
    V: Serialize + DeserializeOwned,
    F: Fn(&A) -> V + Send + Sync + 'static,
{
    Memoized::new(f, handle, JsonCodec)
}

/// A producer bound to a cache.
pub struct Memoized<A: ?Sized, V> {
    producer: Producer<A, V>,
    handle: CacheHandle,
    codec: Box<dyn ValueCodec<V>>,
    key_fn: KeyFn<A>,
}

impl<A: ?Sized, V> Memoized<A, V> {
    /// Wrap `f` with the default argument key.
    pub fn new<F, C>(f: F, handle: CacheHandle, codec: C) -> Self
    where
        A: Serialize,
        F: Fn(&A) -> V + Send + Sync + 'static,
        C: ValueCodec<V> + 'static,
    {
        Self {
            producer: Box::new(f),
            handle,
            codec: Box::new(codec),
            key_fn: Box::new(|args: &A| canonicalize(args)),
        }
    }

    /// Replace the key function (builder pattern).
    #[must_use]
    pub fn with_key_fn<K>(mut self, key_fn: K) -> Self
    where
        K: Fn(&A) -> Result<String, CodecError> + Send + Sync + 'static,
    {
        self.key_fn = Box::new(key_fn);
        self
    }

    /// Replace the value codec (builder pattern).
    #[must_use]
    pub fn with_codec<C>(mut self, codec: C) -> Self
    where
        C: ValueCodec<V> + 'static,
    {
        self.codec = Box::new(codec);
        self
    }

    pub fn handle(&self) -> &CacheHandle {
        &self.handle
    }

    /// Look `args` up in the session's partition, computing and storing the
    /// result on a miss.
    pub fn call(&self, session: &mut dyn ClientSession, args: &A) -> GenetworkResult<V> {
        let key = (self.key_fn)(args)?;
        let mut backend = self.handle.bind(session)?;
        backend.touch();

        let counters = self.handle.counters();
        if let Some(entry) = backend.lookup(&key)? {
            let outcome = backend.store(&key, &entry.value)?;
            counters.record_hit();
            counters.record_store(outcome);
            trace!(cache = self.handle.name(), %key, "Memoized hit");
            return self.codec.decode(&entry.value).map_err(Into::into);
        }

        let result = (self.producer)(args);
        let outcome = backend.store(&key, &self.codec.encode(&result)?)?;
        counters.record_miss();
        counters.record_store(outcome);
        trace!(cache = self.handle.name(), %key, "Memoized miss");
        Ok(result)
    }
}

impl<A: ?Sized, V> std::fmt::Debug for Memoized<A, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CacheRegistry;
    use genetwork_core::{CacheConfig, CacheKind, GenetworkError, Identity, SessionError};
    use genetwork_session::SessionToken;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn handle(kind: CacheKind, max_size: usize) -> CacheHandle {
        let registry = CacheRegistry::open(CacheConfig::for_kind(kind).max_size(max_size)).unwrap();
        registry.declare("avatar").unwrap()
    }

    #[test]
    fn test_producer_runs_once_per_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cached = memoize(
            move |seed: &u64| {
                counter.fetch_add(1, Ordering::SeqCst);
                format!("avatar-{seed}")
            },
            handle(CacheKind::Transparent, 4),
        );
        let mut token = SessionToken::new();

        assert_eq!(cached.call(&mut token, &7).unwrap(), "avatar-7");
        assert_eq!(cached.call(&mut token, &7).unwrap(), "avatar-7");
        assert_eq!(cached.call(&mut token, &8).unwrap(), "avatar-8");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = cached.handle().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.stores, 3);
    }

    #[test]
    fn test_hit_refreshes_recency() {
        let cached = memoize(|n: &u32| n.to_string(), handle(CacheKind::Encrypted, 2));
        let mut token = SessionToken::new();

        cached.call(&mut token, &1).unwrap();
        cached.call(&mut token, &2).unwrap();
        cached.call(&mut token, &1).unwrap();
        cached.call(&mut token, &3).unwrap();

        // 2 was least recent, so 1 is still a hit.
        let before = cached.handle().stats().hits;
        cached.call(&mut token, &1).unwrap();
        assert_eq!(cached.handle().stats().hits, before + 1);
    }

    #[test]
    fn test_every_call_marks_client_session() {
        let cached = memoize(|n: &u32| n.to_string(), handle(CacheKind::Transparent, 2));
        let mut token = SessionToken::new();

        cached.call(&mut token, &1).unwrap();
        assert!(token.is_modified());
        token.clear_modified();

        cached.call(&mut token, &1).unwrap();
        assert!(token.is_modified());
    }

    #[test]
    fn test_persistent_needs_identity() {
        let cached = memoize(|n: &u32| n.to_string(), handle(CacheKind::Persistent, 2));
        let mut anonymous = SessionToken::new();
        let err = cached.call(&mut anonymous, &1).unwrap_err();
        assert_eq!(err, GenetworkError::Session(SessionError::NoIdentity));

        let mut token = SessionToken::with_identity(Identity::generate());
        assert_eq!(cached.call(&mut token, &1).unwrap(), "1");
    }

    #[test]
    fn test_json_results() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Layers {
            names: Vec<String>,
        }

        let cached = memoize_json(
            |seed: &str| Layers {
                names: vec![format!("{seed}-base"), format!("{seed}-eyes")],
            },
            handle(CacheKind::Transparent, 2),
        );
        let mut token = SessionToken::new();

        let first = cached.call(&mut token, "x").unwrap();
        let second = cached.call(&mut token, "x").unwrap();
        assert_eq!(first, second);
        assert_eq!(second.names, vec!["x-base", "x-eyes"]);
    }

    #[test]
    fn test_custom_key_fn_collapses_arguments() {
        let cached = memoize(|s: &str| s.to_uppercase(), handle(CacheKind::Transparent, 4))
            .with_key_fn(|s: &str| Ok(s.to_lowercase()));
        let mut token = SessionToken::new();

        assert_eq!(cached.call(&mut token, "Ab").unwrap(), "AB");
        // Same key, so the stored value comes back.
        assert_eq!(cached.call(&mut token, "aB").unwrap(), "AB");
        assert_eq!(cached.handle().stats().hits, 1);
    }
}
