//! Identity and time types for genetwork sessions

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SessionError;

/// Length of every issued identity (hyphenated UUID form).
pub const IDENTITY_LEN: usize = 36;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Opaque per-client session identity.
///
/// Identities are fixed-length printable ASCII. The restriction matters to
/// the persistent tables, which place a `0xFF` separator directly after the
/// identity bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Wrap an externally issued identity string.
    pub fn new(raw: impl Into<String>) -> Result<Self, SessionError> {
        let raw = raw.into();
        if raw.len() != IDENTITY_LEN {
            return Err(SessionError::InvalidIdentity {
                reason: format!("expected {} bytes, got {}", IDENTITY_LEN, raw.len()),
            });
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(SessionError::InvalidIdentity {
                reason: "identity must be printable ASCII".to_string(),
            });
        }
        Ok(Self(raw))
    }

    /// Issue a fresh random identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

/// Source of strictly increasing access timestamps.
///
/// Each call returns a timestamp greater than every timestamp previously
/// returned by the same clock, falling back to `previous + 1ns` when the
/// wall clock has not moved. Recency order therefore matches call order.
#[derive(Debug, Default)]
pub struct AccessClock {
    last_nanos: AtomicI64,
}

impl AccessClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp an access.
    pub fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX - 1);
        let mut previous = self.last_nanos.load(Ordering::Relaxed);
        loop {
            let next = wall.max(previous.saturating_add(1));
            match self.last_nanos.compare_exchange_weak(
                previous,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return DateTime::from_timestamp_nanos(next),
                Err(current) => previous = current,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_has_fixed_length() {
        let identity = Identity::generate();
        assert_eq!(identity.as_str().len(), IDENTITY_LEN);
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let err = Identity::new("short").unwrap_err();
        assert!(matches!(err, SessionError::InvalidIdentity { .. }));
    }

    #[test]
    fn test_new_rejects_non_printable() {
        let raw = format!("{}\u{7f}", "a".repeat(IDENTITY_LEN - 1));
        assert!(Identity::new(raw).is_err());
    }

    #[test]
    fn test_serde_roundtrip_validates() {
        let identity = Identity::generate();
        let json = serde_json::to_string(&identity).unwrap();
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, back);

        assert!(serde_json::from_str::<Identity>("\"nope\"").is_err());
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = AccessClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_clock_is_monotonic_across_threads() {
        let clock = std::sync::Arc::new(AccessClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..250).map(|_| clock.now()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Timestamp> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "no two stamps may be equal");
    }
}
