//! Genetwork cache probe
//!
//! Opens a registry from the environment, memoizes a deliberately slow
//! producer and runs a miss followed by a hit for a few seeds in one session.
//! Finishes by expiring the session through the reaper so persistent rows
//! are dropped.

use std::sync::Arc;
use std::time::Instant;

use genetwork_cache::{memoize, CacheRegistry};
use genetwork_core::{CacheConfig, ConfigError, GenetworkResult, SessionConfig};
use genetwork_session::{SessionHooks, SessionManager, SessionReaper, SessionToken};
use sha2::{Digest, Sha256};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_ROUNDS: usize = 4;
const DEFAULT_WORK: usize = 20_000;

fn main() -> GenetworkResult<()> {
    init_tracing()?;

    let cache_config = CacheConfig::from_env()?;
    let session_config = SessionConfig::from_env()?;
    let rounds = env_usize("GENETWORK_PROBE_ROUNDS", DEFAULT_ROUNDS)?;
    let work = env_usize("GENETWORK_PROBE_WORK", DEFAULT_WORK)?;

    let hooks = SessionHooks::new();
    let reaper = SessionReaper::attach(session_config.clone(), &hooks);
    let registry = Arc::new(CacheRegistry::open(cache_config)?);
    registry.attach_hooks(&hooks);
    let manager = SessionManager::new(hooks.clone());

    let digest = memoize(move |seed: &str| iterated_sha256(seed, work), registry.declare("digest")?);

    let mut token = SessionToken::new();
    let identity = manager.begin_request(&mut token);
    tracing::info!(%identity, kind = %registry.kind(), rounds, work, "Probe session started");

    for round in 0..rounds {
        let seed = format!("seed-{round}");
        for pass in ["first", "second"] {
            let started = Instant::now();
            let value = digest.call(&mut token, seed.as_str())?;
            tracing::info!(
                round,
                pass,
                elapsed_us = started.elapsed().as_micros() as u64,
                digest = &value[..value.len().min(16)],
                "Probe call"
            );
        }
    }

    let stats = digest.handle().stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        conflicts = stats.conflicts,
        hit_rate = stats.hit_rate(),
        "Probe cache stats"
    );

    let idle = chrono::Duration::from_std(session_config.session_duration)
        .unwrap_or(chrono::Duration::days(365));
    let expired = reaper.collect_expired(chrono::Utc::now() + idle + chrono::Duration::seconds(1));
    tracing::info!(
        expired = expired.len(),
        sessions_reaped = reaper.metrics().snapshot().sessions_reaped,
        "Probe session torn down"
    );

    Ok(())
}

fn init_tracing() -> GenetworkResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("genetwork_cache=debug,genetwork_session=info,info")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| {
            ConfigError::InvalidValue {
                field: "RUST_LOG".to_string(),
                value: String::new(),
                reason: format!("Failed to init subscriber: {}", e),
            }
            .into()
        })
}

fn env_usize(name: &str, default: usize) -> GenetworkResult<usize> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw.clone(),
                reason: "expected a non-negative integer".to_string(),
            }
            .into()
        }),
        Err(_) => Ok(default),
    }
}

/// Hash `seed` `rounds` times, feeding each digest into the next.
fn iterated_sha256(seed: &str, rounds: usize) -> String {
    let mut digest = Sha256::digest(seed.as_bytes());
    for _ in 1..rounds {
        digest = Sha256::digest(digest);
    }
    hex::encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterated_sha256_single_round_matches_plain_digest() {
        assert_eq!(
            iterated_sha256("abc", 1),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_iterated_sha256_is_deterministic() {
        assert_eq!(iterated_sha256("seed-0", 50), iterated_sha256("seed-0", 50));
        assert_ne!(iterated_sha256("seed-0", 50), iterated_sha256("seed-0", 51));
    }
}
