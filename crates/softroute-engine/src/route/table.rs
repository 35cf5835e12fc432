//! Path-vector route table with longest-prefix lookup.

use std::collections::HashMap;

use softroute_core::packet::{RouteOp, RouteUpdate};
use softroute_core::types::{Addr, Cidr};

use super::types::{validate, ApplyOutcome, RejectReason, RouteEntry};

/// Route store keyed by prefix, at most one entry per (prefix, origin).
#[must_use]
pub struct RouteTable {
    prefixes: HashMap<Cidr, Vec<RouteEntry>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            prefixes: HashMap::new(),
        }
    }

    /// Apply an announce or withdraw.
    ///
    /// Sequence discipline per origin: an incoming message is applied
    /// only when its sequence is `>=` the stored one, so reordered or
    /// duplicated announces are no-ops. Equal sequences favor the newer
    /// message (last writer wins).
    pub fn apply(&mut self, update: &RouteUpdate, now: u64) -> ApplyOutcome {
        if let Err(reason) = validate(update) {
            return ApplyOutcome::Rejected(reason);
        }

        match update.op {
            RouteOp::Announce => self.apply_announce(update, now),
            RouteOp::Withdraw => self.apply_withdraw(update),
        }
    }

    fn apply_announce(&mut self, update: &RouteUpdate, now: u64) -> ApplyOutcome {
        let entries = self.prefixes.entry(update.prefix).or_default();
        let incoming = RouteEntry {
            prefix: update.prefix,
            origin: update.origin.clone(),
            // validate() guarantees presence for announces
            next_hop: update.next_hop.unwrap_or(Addr::from_u32(0)),
            metric: update.metric,
            sequence: update.sequence,
            timestamp: now,
        };

        match entries.iter_mut().find(|e| e.origin == update.origin) {
            Some(existing) => {
                if update.sequence < existing.sequence {
                    return ApplyOutcome::Rejected(RejectReason::StaleSequence {
                        stored: existing.sequence,
                        incoming: update.sequence,
                    });
                }
                *existing = incoming;
            }
            None => entries.push(incoming),
        }
        ApplyOutcome::Applied
    }

    fn apply_withdraw(&mut self, update: &RouteUpdate) -> ApplyOutcome {
        let Some(entries) = self.prefixes.get_mut(&update.prefix) else {
            return ApplyOutcome::Rejected(RejectReason::UnknownEntry);
        };
        let Some(pos) = entries.iter().position(|e| e.origin == update.origin) else {
            return ApplyOutcome::Rejected(RejectReason::UnknownEntry);
        };
        if update.sequence < entries[pos].sequence {
            return ApplyOutcome::Rejected(RejectReason::StaleSequence {
                stored: entries[pos].sequence,
                incoming: update.sequence,
            });
        }
        entries.remove(pos);
        if entries.is_empty() {
            // Withdrawing the last entry removes the prefix key entirely
            self.prefixes.remove(&update.prefix);
        }
        ApplyOutcome::Applied
    }

    /// Deterministic best-route selection among one prefix's candidates:
    /// lowest metric, then highest sequence, then lexicographically
    /// smallest origin.
    #[must_use]
    pub fn select_best<'a>(candidates: &'a [RouteEntry]) -> Option<&'a RouteEntry> {
        candidates.iter().min_by(|a, b| {
            a.metric
                .cmp(&b.metric)
                .then(b.sequence.cmp(&a.sequence))
                .then(a.origin.cmp(&b.origin))
        })
    }

    /// Longest-prefix match for `addr`.
    ///
    /// Among prefixes tying on mask length, the numerically smallest
    /// network address wins; the result never depends on map iteration
    /// order.
    #[must_use]
    pub fn lookup(&self, addr: Addr) -> Option<&RouteEntry> {
        let prefix = self
            .prefixes
            .keys()
            .filter(|p| p.contains(addr))
            .max_by(|a, b| {
                a.prefix_len()
                    .cmp(&b.prefix_len())
                    .then(b.network().cmp(&a.network()))
            })?;
        Self::select_best(&self.prefixes[prefix])
    }

    /// The candidate list for an exact prefix.
    #[must_use]
    pub fn entries(&self, prefix: &Cidr) -> Option<&[RouteEntry]> {
        self.prefixes.get(prefix).map(Vec::as_slice)
    }

    /// Remove entries older than `max_age` regardless of sequence;
    /// prunes emptied prefixes. Returns the count removed.
    pub fn sweep_stale(&mut self, now: u64, max_age: u64) -> usize {
        let mut removed = 0;
        self.prefixes.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| !e.is_stale(now, max_age));
            removed += before - entries.len();
            !entries.is_empty()
        });
        removed
    }

    /// Number of prefixes with at least one entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Iterate over every entry in the table.
    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.prefixes.values().flatten()
    }

    /// Rebuild a table from persisted entries.
    pub fn from_entries(entries: impl IntoIterator<Item = RouteEntry>) -> Self {
        let mut prefixes: HashMap<Cidr, Vec<RouteEntry>> = HashMap::new();
        for entry in entries {
            prefixes.entry(entry.prefix).or_default().push(entry);
        }
        Self { prefixes }
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}
