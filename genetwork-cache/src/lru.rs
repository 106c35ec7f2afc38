//! LRU core shared by every backend.
//!
//! Operates on a borrowed [`Partition`] so the same logic runs against a
//! partition embedded in a client token and, through [`oldest`], against rows
//! scanned out of a record table.

use genetwork_core::{CacheEntry, Partition, Timestamp};

/// Look up an entry without touching it.
pub fn get<'p>(partition: &'p Partition, key: &str) -> Option<&'p CacheEntry> {
    partition.get(key)
}

/// Insert or overwrite `key`, stamping it with `now`. Returns true if the key
/// was not present before.
pub fn put(partition: &mut Partition, key: &str, value: &str, now: Timestamp) -> bool {
    partition
        .insert(key.to_string(), CacheEntry::new(value, now))
        .is_none()
}

/// Whether a partition of `len` entries must shed one after a store.
pub fn over_capacity(len: usize, max_size: usize) -> bool {
    len > max_size
}

/// Pick the least recently used key out of `(key, last_access)` pairs.
///
/// Ties on `last_access` go to the lowest key in byte order, so every
/// backend agrees on the victim.
pub fn oldest<'a, I>(entries: I) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, Timestamp)>,
{
    entries
        .into_iter()
        .min_by(|(ka, ta), (kb, tb)| ta.cmp(tb).then_with(|| ka.as_bytes().cmp(kb.as_bytes())))
        .map(|(key, _)| key)
}

/// Remove the least recently used entry.
pub fn evict_one(partition: &mut Partition) -> Option<(String, CacheEntry)> {
    let victim = oldest(partition.iter().map(|(k, e)| (k.as_str(), e.last_access)))?.to_string();
    partition.remove_entry(&victim)
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_bounded_after_every_store(
            keys in prop::collection::vec("[a-f]{1,2}", 1..40),
            max_size in 1usize..6,
        ) {
            let mut partition = Partition::new();
            let t0 = Utc::now();
            for (i, key) in keys.iter().enumerate() {
                put(&mut partition, key, "v", t0 + Duration::microseconds(i as i64));
                if over_capacity(partition.len(), max_size) {
                    evict_one(&mut partition);
                }
                prop_assert!(partition.len() <= max_size);
            }
        }

        #[test]
        fn prop_victim_has_minimum_access(stamps in prop::collection::vec(0i64..5, 1..12)) {
            let mut partition = Partition::new();
            let t0 = Utc::now();
            for (i, offset) in stamps.iter().enumerate() {
                put(&mut partition, &format!("k{i:02}"), "v", t0 + Duration::seconds(*offset));
            }
            let min = partition.values().map(|e| e.last_access).min().unwrap();
            let (_, victim) = evict_one(&mut partition).unwrap();
            prop_assert_eq!(victim.last_access, min);
        }
    }
}
