//! Port address translation behind a single external address.
//!
//! The table keeps a forward map `(internal addr, internal port) →
//! external port` and a reverse map carrying the metadata. The two are
//! always mutated together; the mapping is a bijection between allocated
//! external ports and internal pairs.

use std::collections::HashMap;

use softroute_core::types::{Addr, HardwareId};

use crate::error::NatError;

/// Reverse-map entry for one allocated external port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatEntry {
    pub internal_addr: Addr,
    pub internal_port: u16,
    /// Identity that originated the mapping, kept for diagnostics.
    pub identity: HardwareId,
    /// Monotonic seconds of last traffic in either direction.
    pub last_used: u64,
}

/// Bidirectional PAT table.
#[must_use]
pub struct NatTable {
    outbound: HashMap<(Addr, u16), u16>,
    inbound: HashMap<u16, NatEntry>,
    range_start: u16,
    range_end: u16,
    /// Rotating allocation cursor; next candidate external port.
    cursor: u16,
}

impl NatTable {
    /// Create a table allocating from the inclusive port range
    /// `[range_start, range_end]`. Bounds given in the wrong order are
    /// swapped; the range is never empty.
    pub fn new(range_start: u16, range_end: u16) -> Self {
        let (range_start, range_end) = ordered(range_start, range_end);
        Self {
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            range_start,
            range_end,
            cursor: range_start,
        }
    }

    /// Map an outbound flow to an external port, allocating if needed.
    ///
    /// An existing mapping is refreshed and returned unchanged, so a
    /// flow keeps its port for as long as it stays active.
    pub fn map_outbound(
        &mut self,
        internal_addr: Addr,
        internal_port: u16,
        identity: &HardwareId,
        now: u64,
    ) -> Result<u16, NatError> {
        let key = (internal_addr, internal_port);
        if let Some(&port) = self.outbound.get(&key) {
            if let Some(entry) = self.inbound.get_mut(&port) {
                entry.last_used = now;
            }
            return Ok(port);
        }

        let port = self.allocate_port()?;
        self.outbound.insert(key, port);
        self.inbound.insert(
            port,
            NatEntry {
                internal_addr,
                internal_port,
                identity: identity.clone(),
                last_used: now,
            },
        );
        Ok(port)
    }

    /// Resolve an inbound external port to its internal pair,
    /// refreshing the entry. `None` means unsolicited traffic; callers
    /// drop silently.
    pub fn map_inbound(&mut self, external_port: u16, now: u64) -> Option<(Addr, u16)> {
        let entry = self.inbound.get_mut(&external_port)?;
        entry.last_used = now;
        Some((entry.internal_addr, entry.internal_port))
    }

    /// The reverse entry for an external port, without refreshing it.
    #[must_use]
    pub fn get(&self, external_port: u16) -> Option<&NatEntry> {
        self.inbound.get(&external_port)
    }

    /// Remove mapping pairs idle longer than `timeout`.
    ///
    /// Both directions are removed together; a freed port becomes
    /// allocatable again immediately.
    pub fn sweep_expired(&mut self, now: u64, timeout: u64) -> usize {
        let expired: Vec<u16> = self
            .inbound
            .iter()
            .filter(|(_, entry)| now.saturating_sub(entry.last_used) > timeout)
            .map(|(&port, _)| port)
            .collect();

        for port in &expired {
            if let Some(entry) = self.inbound.remove(port) {
                self.outbound
                    .remove(&(entry.internal_addr, entry.internal_port));
            }
        }
        expired.len()
    }

    /// Scan from the cursor for a free port, wrapping at the range end.
    /// Fails only after a full rotation finds nothing.
    fn allocate_port(&mut self) -> Result<u16, NatError> {
        let span = u32::from(self.range_end - self.range_start) + 1;
        for _ in 0..span {
            let candidate = self.cursor;
            self.cursor = if self.cursor >= self.range_end {
                self.range_start
            } else {
                self.cursor + 1
            };
            if !self.inbound.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(NatError::PortsExhausted)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inbound.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inbound.is_empty()
    }

    /// Iterate over all reverse entries.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &NatEntry)> {
        self.inbound.iter().map(|(&port, entry)| (port, entry))
    }

    /// Rebuild a table from persisted entries. Rebuilds the forward map
    /// from the reverse map so the bijection cannot drift.
    pub fn from_entries(
        range_start: u16,
        range_end: u16,
        entries: impl IntoIterator<Item = (u16, NatEntry)>,
    ) -> Self {
        let (range_start, range_end) = ordered(range_start, range_end);
        let inbound: HashMap<u16, NatEntry> = entries.into_iter().collect();
        let outbound = inbound
            .iter()
            .map(|(&port, e)| ((e.internal_addr, e.internal_port), port))
            .collect();
        Self {
            outbound,
            inbound,
            range_start,
            range_end,
            cursor: range_start,
        }
    }
}

const fn ordered(a: u16, b: u16) -> (u16, u16) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NatTable {
        NatTable::new(20_000, 20_003)
    }

    fn hw(name: &str) -> HardwareId {
        HardwareId::new(name)
    }

    #[test]
    fn test_outbound_allocates_from_cursor() {
        let mut nat = table();
        let p1 = nat
            .map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 0)
            .unwrap();
        let p2 = nat
            .map_outbound(Addr::new(10, 0, 0, 6), 40_000, &hw("b"), 0)
            .unwrap();
        assert_eq!(p1, 20_000);
        assert_eq!(p2, 20_001);
    }

    #[test]
    fn test_outbound_stable_per_flow() {
        let mut nat = table();
        let first = nat
            .map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 0)
            .unwrap();
        let second = nat
            .map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 100)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(nat.len(), 1);
        // Refresh moved the timestamp forward
        assert_eq!(nat.get(first).unwrap().last_used, 100);
    }

    #[test]
    fn test_bijection() {
        let mut nat = table();
        let port = nat
            .map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 0)
            .unwrap();
        assert_eq!(
            nat.map_inbound(port, 1),
            Some((Addr::new(10, 0, 0, 5), 40_000))
        );
    }

    #[test]
    fn test_inbound_miss_is_none() {
        let mut nat = table();
        assert_eq!(nat.map_inbound(20_000, 0), None);
    }

    #[test]
    fn test_ports_exhausted_after_full_rotation() {
        let mut nat = table();
        for i in 0..4u16 {
            nat.map_outbound(Addr::new(10, 0, 0, 5), 40_000 + i, &hw("a"), 0)
                .unwrap();
        }
        assert_eq!(
            nat.map_outbound(Addr::new(10, 0, 0, 9), 1, &hw("b"), 0),
            Err(NatError::PortsExhausted)
        );
    }

    #[test]
    fn test_sweep_removes_both_directions() {
        let mut nat = table();
        let port = nat
            .map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 0)
            .unwrap();

        let removed = nat.sweep_expired(1000, 500);
        assert_eq!(removed, 1);
        assert_eq!(nat.map_inbound(port, 1000), None);
        // The freed port is allocatable again
        let port2 = nat
            .map_outbound(Addr::new(10, 0, 0, 7), 50_000, &hw("c"), 1000)
            .unwrap();
        assert!(nat.get(port2).is_some());
    }

    #[test]
    fn test_sweep_keeps_refreshed_entries() {
        let mut nat = table();
        let idle = nat
            .map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 0)
            .unwrap();
        let busy = nat
            .map_outbound(Addr::new(10, 0, 0, 6), 40_000, &hw("b"), 0)
            .unwrap();
        nat.map_inbound(busy, 900);

        let removed = nat.sweep_expired(1000, 500);
        assert_eq!(removed, 1);
        assert!(nat.get(idle).is_none());
        assert!(nat.get(busy).is_some());
    }

    #[test]
    fn test_sweep_at_exact_timeout_keeps_entry() {
        let mut nat = table();
        nat.map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 0)
            .unwrap();
        // idle == timeout → NOT expired (strict >)
        assert_eq!(nat.sweep_expired(500, 500), 0);
        assert_eq!(nat.sweep_expired(501, 500), 1);
    }

    #[test]
    fn test_cursor_wraps_and_skips_held_ports() {
        let mut nat = table();
        // Fill all four ports; the cursor has wrapped back to range_start
        for i in 0..4u16 {
            nat.map_outbound(Addr::new(10, 0, 0, 5), 40_000 + i, &hw("a"), 0)
                .unwrap();
        }
        // Refresh everything except the flow on 20_002, then expire it
        for i in [0u16, 1, 3] {
            nat.map_outbound(Addr::new(10, 0, 0, 5), 40_000 + i, &hw("a"), 1000)
                .unwrap();
        }
        assert_eq!(nat.sweep_expired(1000, 500), 1);

        // The next allocation must skip the three held ports and land on
        // the single free one
        let port = nat
            .map_outbound(Addr::new(10, 0, 0, 8), 1, &hw("b"), 1000)
            .unwrap();
        assert_eq!(port, 20_002);
    }

    #[test]
    fn test_inverted_range_is_normalized() {
        // Reversed bounds must not break allocation arithmetic.
        let mut nat = NatTable::new(30_100, 30_000);
        let port = nat
            .map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 0)
            .unwrap();
        assert_eq!(port, 30_000);
    }

    #[test]
    fn test_from_entries_rebuilds_forward_map() {
        let entry = NatEntry {
            internal_addr: Addr::new(10, 0, 0, 5),
            internal_port: 40_000,
            identity: hw("a"),
            last_used: 7,
        };
        let mut nat = NatTable::from_entries(20_000, 20_003, [(20_002, entry)]);
        // Forward direction works without ever calling map_outbound
        assert_eq!(
            nat.map_outbound(Addr::new(10, 0, 0, 5), 40_000, &hw("a"), 8)
                .unwrap(),
            20_002
        );
    }
}
