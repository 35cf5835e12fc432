//! Downstream client registrations on the backbone side.
//!
//! A lighter-weight analog of a lease: identity bound to a claimed
//! external address, refreshed by traffic, swept by idle timeout.

use std::collections::HashMap;

use softroute_core::types::{Addr, HardwareId};

/// One registered downstream router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    pub address: Addr,
    /// Monotonic seconds of last traffic or registration.
    pub last_seen: u64,
}

/// Registration table keyed by hardware id.
#[must_use]
pub struct ClientTable {
    entries: HashMap<HardwareId, ClientEntry>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register or re-register an identity with its claimed address.
    pub fn register(&mut self, identity: HardwareId, address: Addr, now: u64) {
        self.entries.insert(
            identity,
            ClientEntry {
                address,
                last_seen: now,
            },
        );
    }

    /// Refresh the last-seen time. Returns `false` if unregistered.
    pub fn refresh(&mut self, identity: &HardwareId, now: u64) -> bool {
        match self.entries.get_mut(identity) {
            Some(entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, identity: &HardwareId) -> Option<&ClientEntry> {
        self.entries.get(identity)
    }

    /// Reverse lookup: the identity registered at `address`, if any.
    #[must_use]
    pub fn resolve(&self, address: Addr) -> Option<&HardwareId> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.address == address)
            .map(|(id, _)| id)
    }

    /// Whether `identity` is registered and authorized to source traffic
    /// from `address`.
    #[must_use]
    pub fn is_authorized(&self, identity: &HardwareId, address: Addr) -> bool {
        self.entries
            .get(identity)
            .is_some_and(|entry| entry.address == address)
    }

    /// Remove registrations idle longer than `timeout`. Returns the
    /// count removed.
    pub fn sweep_idle(&mut self, now: u64, timeout: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_sub(entry.last_seen) <= timeout);
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw(name: &str) -> HardwareId {
        HardwareId::new(name)
    }

    #[test]
    fn test_register_and_resolve() {
        let mut clients = ClientTable::new();
        clients.register(hw("r1"), Addr::new(80, 0, 0, 2), 0);

        assert_eq!(clients.resolve(Addr::new(80, 0, 0, 2)), Some(&hw("r1")));
        assert_eq!(clients.resolve(Addr::new(80, 0, 0, 3)), None);
    }

    #[test]
    fn test_reregistration_replaces_address() {
        let mut clients = ClientTable::new();
        clients.register(hw("r1"), Addr::new(80, 0, 0, 2), 0);
        clients.register(hw("r1"), Addr::new(80, 0, 0, 9), 5);

        assert_eq!(clients.len(), 1);
        assert_eq!(clients.get(&hw("r1")).unwrap().address, Addr::new(80, 0, 0, 9));
        assert_eq!(clients.resolve(Addr::new(80, 0, 0, 2)), None);
    }

    #[test]
    fn test_refresh() {
        let mut clients = ClientTable::new();
        clients.register(hw("r1"), Addr::new(80, 0, 0, 2), 0);

        assert!(clients.refresh(&hw("r1"), 100));
        assert_eq!(clients.get(&hw("r1")).unwrap().last_seen, 100);
        assert!(!clients.refresh(&hw("ghost"), 100));
    }

    #[test]
    fn test_is_authorized() {
        let mut clients = ClientTable::new();
        clients.register(hw("r1"), Addr::new(80, 0, 0, 2), 0);

        assert!(clients.is_authorized(&hw("r1"), Addr::new(80, 0, 0, 2)));
        assert!(!clients.is_authorized(&hw("r1"), Addr::new(80, 0, 0, 3)));
        assert!(!clients.is_authorized(&hw("ghost"), Addr::new(80, 0, 0, 2)));
    }

    #[test]
    fn test_sweep_idle() {
        let mut clients = ClientTable::new();
        clients.register(hw("old"), Addr::new(80, 0, 0, 2), 0);
        clients.register(hw("fresh"), Addr::new(80, 0, 0, 3), 900);

        let removed = clients.sweep_idle(1000, 500);
        assert_eq!(removed, 1);
        assert!(clients.get(&hw("old")).is_none());
        assert!(clients.get(&hw("fresh")).is_some());
    }
}
