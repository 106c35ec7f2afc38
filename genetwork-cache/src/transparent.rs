//! Client-held backend: entries live in a partition of the session token.

use genetwork_core::{AccessClock, CacheEntry, GenetworkResult, Partition};
use genetwork_session::ClientSession;
use tracing::debug;

use crate::lru;
use crate::traits::{CacheBackend, StoreOutcome};

/// Backend over one named partition of a [`ClientSession`].
///
/// Reads never flag the session; every mutation does.
pub struct TransparentBackend<'s> {
    session: &'s mut dyn ClientSession,
    partition: &'s str,
    max_size: usize,
    clock: &'s AccessClock,
}

impl<'s> TransparentBackend<'s> {
    pub fn new(
        session: &'s mut dyn ClientSession,
        partition: &'s str,
        max_size: usize,
        clock: &'s AccessClock,
    ) -> Self {
        Self {
            session,
            partition,
            max_size,
            clock,
        }
    }

    pub fn partition_name(&self) -> &str {
        self.partition
    }

    /// Raw stored entries, as written by this backend or a wrapper.
    pub(crate) fn entries(&self) -> Option<&Partition> {
        self.session.partition(self.partition)
    }
}

impl CacheBackend for TransparentBackend<'_> {
    fn lookup(&mut self, key: &str) -> GenetworkResult<Option<CacheEntry>> {
        Ok(self
            .entries()
            .and_then(|partition| lru::get(partition, key))
            .cloned())
    }

    fn store(&mut self, key: &str, value: &str) -> GenetworkResult<StoreOutcome> {
        let now = self.clock.now();
        let partition = self.session.partition_mut(self.partition);
        lru::put(partition, key, value, now);

        let mut outcome = StoreOutcome::default();
        if lru::over_capacity(partition.len(), self.max_size) {
            if let Some((victim, _)) = lru::evict_one(partition) {
                debug!(partition = self.partition, %victim, "Evicted client-held entry");
                outcome.evicted = true;
            }
        }

        self.session.mark_modified(self.partition);
        Ok(outcome)
    }

    fn evict(&mut self) -> GenetworkResult<bool> {
        // An absent partition must stay absent.
        if self.entries().map_or(true, Partition::is_empty) {
            return Ok(false);
        }

        let evicted = lru::evict_one(self.session.partition_mut(self.partition)).is_some();
        if evicted {
            self.session.mark_modified(self.partition);
        }
        Ok(evicted)
    }

    fn len(&self) -> GenetworkResult<usize> {
        Ok(self.entries().map_or(0, Partition::len))
    }

    fn touch(&mut self) {
        self.session.mark_modified(self.partition);
    }

    fn max_size(&self) -> usize {
        self.max_size
    }
}
