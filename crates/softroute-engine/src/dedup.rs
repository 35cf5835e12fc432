//! Duplicate-packet suppression.
//!
//! A bounded least-recently-touched cache of packet identifiers with an
//! independent age-based sweep. Capacity eviction and the age sweep are
//! two separate mechanisms: overflow removes the single least-recently
//! touched id, while the sweep removes everything older than a limit
//! regardless of recency.
//!
//! Recency is tracked with a map plus a deque of `(touch sequence, id)`
//! pairs; stale deque slots are skipped lazily on eviction, keeping
//! touch and evict O(1) amortized.

use std::collections::{HashMap, VecDeque};

use softroute_core::types::PacketId;

#[derive(Debug, Clone, Copy)]
struct Slot {
    /// Set on first sight only; consumed by the age sweep.
    first_seen: u64,
    /// Sequence number of the latest touch; identifies the live deque slot.
    touch_seq: u64,
}

/// Bounded duplicate filter over packet identifiers.
#[must_use]
pub struct DuplicateFilter {
    entries: HashMap<PacketId, Slot>,
    recency: VecDeque<(u64, PacketId)>,
    capacity: usize,
    next_seq: u64,
}

impl DuplicateFilter {
    /// Create a filter holding at most `capacity` identifiers.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be nonzero");
        Self {
            entries: HashMap::with_capacity(capacity),
            recency: VecDeque::new(),
            capacity,
            next_seq: 0,
        }
    }

    /// Whether `id` has been seen and not yet evicted.
    #[must_use]
    pub fn contains(&self, id: &PacketId) -> bool {
        self.entries.contains_key(id)
    }

    /// Insert `id` or refresh its recency. `now` becomes the entry's
    /// first-seen time only on first sight.
    pub fn touch(&mut self, id: PacketId, now: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;

        match self.entries.get_mut(&id) {
            Some(slot) => {
                slot.touch_seq = seq;
            }
            None => {
                if self.entries.len() >= self.capacity {
                    self.evict_lru();
                }
                self.entries.insert(
                    id,
                    Slot {
                        first_seen: now,
                        touch_seq: seq,
                    },
                );
            }
        }
        self.recency.push_back((seq, id));
    }

    /// Remove every entry older than `max_age`. Returns the count removed.
    ///
    /// Orthogonal to capacity eviction: recency order is irrelevant here.
    pub fn sweep(&mut self, now: u64, max_age: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| now.saturating_sub(slot.first_seen) <= max_age);
        // Drop deque slots whose id no longer exists or was re-touched
        let entries = &self.entries;
        self.recency
            .retain(|(seq, id)| entries.get(id).is_some_and(|slot| slot.touch_seq == *seq));
        before - self.entries.len()
    }

    /// Pop deque slots until one matches a live entry, then remove it.
    fn evict_lru(&mut self) {
        while let Some((seq, id)) = self.recency.pop_front() {
            if self
                .entries
                .get(&id)
                .is_some_and(|slot| slot.touch_seq == seq)
            {
                self.entries.remove(&id);
                return;
            }
            // Stale slot from an earlier touch of a refreshed or swept id
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over tracked ids with their first-seen times.
    pub fn iter(&self) -> impl Iterator<Item = (&PacketId, u64)> {
        self.entries.iter().map(|(id, slot)| (id, slot.first_seen))
    }
}
