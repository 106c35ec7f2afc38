//! Idle session reaper.
//!
//! Tracks the last activity of every identity seen by the process and, on a
//! fixed interval, fires `Delete` for identities idle longer than the
//! configured session duration. Caches subscribe to `Delete` to drop the
//! server-side data of the identity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use chrono::Utc;
use genetwork_core::{Identity, SessionConfig, Timestamp};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::{SessionEvent, SessionHooks};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for reaper activity.
#[derive(Debug, Default)]
pub struct ReaperMetrics {
    /// Sweeps completed since startup
    pub sweeps: AtomicU64,
    /// Identities torn down since startup
    pub sessions_reaped: AtomicU64,
    /// Delete handlers that returned an error
    pub handler_failures: AtomicU64,
}

impl ReaperMetrics {
    pub fn snapshot(&self) -> ReaperSnapshot {
        ReaperSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            sessions_reaped: self.sessions_reaped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReaperMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperSnapshot {
    pub sweeps: u64,
    pub sessions_reaped: u64,
    pub handler_failures: u64,
}

// ============================================================================
// REAPER
// ============================================================================

/// Garbage collector for idle sessions.
#[derive(Debug)]
pub struct SessionReaper {
    config: SessionConfig,
    hooks: SessionHooks,
    last_seen: RwLock<HashMap<Identity, Timestamp>>,
    metrics: ReaperMetrics,
}

impl SessionReaper {
    pub fn new(config: SessionConfig, hooks: SessionHooks) -> Self {
        Self {
            config,
            hooks,
            last_seen: RwLock::new(HashMap::new()),
            metrics: ReaperMetrics::default(),
        }
    }

    /// Build a reaper and subscribe it to create/connect events.
    ///
    /// The subscription holds a weak reference, so dropping the returned
    /// reaper turns the handlers into no-ops.
    pub fn attach(config: SessionConfig, hooks: &SessionHooks) -> Arc<Self> {
        let reaper = Arc::new(Self::new(config, hooks.clone()));

        for event in [SessionEvent::Create, SessionEvent::Connect] {
            let weak: Weak<Self> = Arc::downgrade(&reaper);
            hooks.on(event, move |identity| {
                if let Some(reaper) = weak.upgrade() {
                    reaper.record(identity, Utc::now());
                }
                Ok(())
            });
        }

        reaper
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ReaperMetrics {
        &self.metrics
    }

    /// Record activity for an identity.
    pub fn record(&self, identity: &Identity, at: Timestamp) {
        let mut last_seen = self.last_seen.write().unwrap_or_else(|e| e.into_inner());
        let slot = last_seen.entry(identity.clone()).or_insert(at);
        if *slot < at {
            *slot = at;
        }
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.last_seen.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Remove every identity idle for longer than the session duration and
    /// fire `Delete` for each. Returns the identities removed.
    pub fn collect_expired(&self, now: Timestamp) -> Vec<Identity> {
        let duration = chrono::Duration::from_std(self.config.session_duration)
            .unwrap_or(chrono::Duration::MAX);

        let expired: Vec<Identity> = {
            let mut last_seen = self.last_seen.write().unwrap_or_else(|e| e.into_inner());
            let expired: Vec<Identity> = last_seen
                .iter()
                .filter(|(_, seen)| now.signed_duration_since(**seen) > duration)
                .map(|(identity, _)| identity.clone())
                .collect();
            for identity in &expired {
                last_seen.remove(identity);
            }
            expired
        };

        self.metrics.sweeps.fetch_add(1, Ordering::Relaxed);

        for identity in &expired {
            tracing::debug!(%identity, "Reaping idle session");
            let failures = self.hooks.trigger(SessionEvent::Delete, identity);
            self.metrics
                .handler_failures
                .fetch_add(failures as u64, Ordering::Relaxed);
        }

        if !expired.is_empty() {
            self.metrics
                .sessions_reaped
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            tracing::info!(count = expired.len(), "Session sweep completed");
        } else {
            tracing::trace!("Session sweep completed with no idle sessions");
        }

        expired
    }

    /// Sweep on the configured interval until the shutdown flag flips.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> ReaperSnapshot {
        let mut sweep_interval = interval(self.config.clean_interval);
        sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            session_duration_secs = self.config.session_duration.as_secs(),
            clean_interval_secs = self.config.clean_interval.as_secs(),
            "Session reaper started"
        );

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        tracing::info!("Session reaper shutting down");
                        break;
                    }
                }

                _ = sweep_interval.tick() => {
                    self.collect_expired(Utc::now());
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            sweeps = snapshot.sweeps,
            sessions_reaped = snapshot.sessions_reaped,
            handler_failures = snapshot.handler_failures,
            "Session reaper completed"
        );
        snapshot
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    proptest! {
        #[test]
        fn prop_record_never_moves_backwards(offsets in prop::collection::vec(-600i64..600, 1..20)) {
            let config = SessionConfig {
                session_duration: Duration::from_secs(60),
                clean_interval: Duration::from_secs(1),
            };
            let reaper = SessionReaper::new(config, SessionHooks::new());
            let identity = Identity::generate();
            let t0 = Utc::now();

            for offset in &offsets {
                reaper.record(&identity, t0 + chrono::Duration::seconds(*offset));
            }

            // Only the latest stamp decides expiry, whatever the recording order.
            let latest = t0 + chrono::Duration::seconds(*offsets.iter().max().unwrap());
            let deadline = latest + chrono::Duration::seconds(60);
            prop_assert!(reaper.collect_expired(deadline).is_empty());
            prop_assert_eq!(
                reaper.collect_expired(deadline + chrono::Duration::seconds(1)),
                vec![identity]
            );
        }
    }
}
