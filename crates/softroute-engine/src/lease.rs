//! DHCP-style lease management for private addresses.

use std::collections::HashMap;

use softroute_core::types::{Addr, HardwareId};

use crate::error::LeaseError;

/// A private-address lease held by one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub address: Addr,
    /// Monotonic seconds at issue or last renewal.
    pub issued_at: u64,
    /// Lease lifetime in seconds.
    pub duration: u64,
}

impl Lease {
    /// Check if this lease is expired at the given time.
    ///
    /// Uses strict `>` comparison.
    #[must_use]
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.issued_at) > self.duration
    }
}

/// Lease table keyed by hardware id.
///
/// Invariants: at most one lease per identity, and no two active leases
/// share an address. Allocation is an ascending linear scan of the pool;
/// pools are small, so the scan is a simplicity trade-off over a
/// free-list.
#[must_use]
pub struct LeaseManager {
    leases: HashMap<HardwareId, Lease>,
    pool_first: Addr,
    pool_last: Addr,
    duration: u64,
}

impl LeaseManager {
    /// Create a manager over the inclusive pool `[first, last]`.
    pub fn new(pool_first: Addr, pool_last: Addr, duration: u64) -> Self {
        Self {
            leases: HashMap::new(),
            pool_first,
            pool_last,
            duration,
        }
    }

    /// Allocate an address for `identity`, or refresh its existing lease.
    ///
    /// Renewal-on-hello: a second request from the same identity without
    /// an intervening release returns the same address and refreshes the
    /// timestamp.
    pub fn allocate(&mut self, identity: &HardwareId, now: u64) -> Result<Addr, LeaseError> {
        if let Some(lease) = self.leases.get_mut(identity) {
            lease.issued_at = now;
            return Ok(lease.address);
        }

        let mut candidate = self.pool_first;
        while candidate <= self.pool_last {
            if !self.address_held(candidate) {
                self.leases.insert(
                    identity.clone(),
                    Lease {
                        address: candidate,
                        issued_at: now,
                        duration: self.duration,
                    },
                );
                return Ok(candidate);
            }
            candidate = candidate.next();
        }
        Err(LeaseError::PoolExhausted)
    }

    /// Release the lease held by `identity`. Returns `false` if none existed.
    pub fn release(&mut self, identity: &HardwareId) -> bool {
        self.leases.remove(identity).is_some()
    }

    /// Reverse lookup: the identity holding `address`, if any.
    #[must_use]
    pub fn resolve(&self, address: Addr) -> Option<&HardwareId> {
        self.leases
            .iter()
            .find(|(_, lease)| lease.address == address)
            .map(|(id, _)| id)
    }

    /// The lease held by `identity`, if any.
    #[must_use]
    pub fn get(&self, identity: &HardwareId) -> Option<&Lease> {
        self.leases.get(identity)
    }

    /// Remove every lease older than `timeout`. Returns the count removed.
    pub fn sweep_expired(&mut self, now: u64, timeout: u64) -> usize {
        let before = self.leases.len();
        self.leases
            .retain(|_, lease| now.saturating_sub(lease.issued_at) <= timeout);
        before - self.leases.len()
    }

    fn address_held(&self, address: Addr) -> bool {
        self.leases.values().any(|l| l.address == address)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.leases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Iterate over all leases.
    pub fn iter(&self) -> impl Iterator<Item = (&HardwareId, &Lease)> {
        self.leases.iter()
    }

    /// Rebuild a lease table from persisted entries.
    ///
    /// Entries whose address falls outside the pool are kept; the pool
    /// bounds only constrain new allocations.
    pub fn from_entries(
        pool_first: Addr,
        pool_last: Addr,
        duration: u64,
        entries: impl IntoIterator<Item = (HardwareId, Lease)>,
    ) -> Self {
        Self {
            leases: entries.into_iter().collect(),
            pool_first,
            pool_last,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool3() -> LeaseManager {
        LeaseManager::new(Addr::new(10, 0, 0, 10), Addr::new(10, 0, 0, 12), 3600)
    }

    fn hw(name: &str) -> HardwareId {
        HardwareId::new(name)
    }

    #[test]
    fn test_allocate_ascending() {
        let mut mgr = pool3();
        assert_eq!(mgr.allocate(&hw("a"), 0).unwrap(), Addr::new(10, 0, 0, 10));
        assert_eq!(mgr.allocate(&hw("b"), 0).unwrap(), Addr::new(10, 0, 0, 11));
        assert_eq!(mgr.allocate(&hw("c"), 0).unwrap(), Addr::new(10, 0, 0, 12));
    }

    #[test]
    fn test_allocate_idempotent_renewal() {
        let mut mgr = pool3();
        let first = mgr.allocate(&hw("a"), 100).unwrap();
        let second = mgr.allocate(&hw("a"), 200).unwrap();
        assert_eq!(first, second);
        assert_eq!(mgr.len(), 1);
        // Renewal refreshed the timestamp
        assert_eq!(mgr.get(&hw("a")).unwrap().issued_at, 200);
    }

    #[test]
    fn test_pool_exhausted() {
        let mut mgr = pool3();
        mgr.allocate(&hw("a"), 0).unwrap();
        mgr.allocate(&hw("b"), 0).unwrap();
        mgr.allocate(&hw("c"), 0).unwrap();
        assert_eq!(mgr.allocate(&hw("d"), 0), Err(LeaseError::PoolExhausted));
    }

    #[test]
    fn test_release_frees_address() {
        let mut mgr = pool3();
        mgr.allocate(&hw("a"), 0).unwrap();
        mgr.allocate(&hw("b"), 0).unwrap();
        mgr.allocate(&hw("c"), 0).unwrap();

        assert!(mgr.release(&hw("b")));
        // The freed address is the lowest available and goes to the next requester
        assert_eq!(mgr.allocate(&hw("d"), 0).unwrap(), Addr::new(10, 0, 0, 11));
    }

    #[test]
    fn test_release_unknown_is_noop() {
        let mut mgr = pool3();
        assert!(!mgr.release(&hw("ghost")));
    }

    #[test]
    fn test_resolve() {
        let mut mgr = pool3();
        let addr = mgr.allocate(&hw("a"), 0).unwrap();
        assert_eq!(mgr.resolve(addr), Some(&hw("a")));
        assert_eq!(mgr.resolve(Addr::new(10, 0, 0, 99)), None);
    }

    #[test]
    fn test_sweep_expired() {
        let mut mgr = pool3();
        mgr.allocate(&hw("old"), 0).unwrap();
        mgr.allocate(&hw("fresh"), 900).unwrap();

        let removed = mgr.sweep_expired(1000, 500);
        assert_eq!(removed, 1);
        assert!(mgr.get(&hw("old")).is_none());
        assert!(mgr.get(&hw("fresh")).is_some());
    }

    #[test]
    fn test_sweep_idempotent_and_safe_on_empty() {
        let mut mgr = pool3();
        assert_eq!(mgr.sweep_expired(1000, 1), 0);
        mgr.allocate(&hw("a"), 0).unwrap();
        assert_eq!(mgr.sweep_expired(1000, 500), 1);
        assert_eq!(mgr.sweep_expired(1000, 500), 0);
    }

    #[test]
    fn test_sweep_at_exact_timeout_keeps_lease() {
        let mut mgr = pool3();
        mgr.allocate(&hw("a"), 0).unwrap();
        // age == timeout → NOT expired (strict >)
        assert_eq!(mgr.sweep_expired(500, 500), 0);
        assert_eq!(mgr.sweep_expired(501, 500), 1);
    }

    #[test]
    fn test_single_address_pool() {
        let one = Addr::new(10, 0, 0, 10);
        let mut mgr = LeaseManager::new(one, one, 3600);
        assert_eq!(mgr.allocate(&hw("a"), 0).unwrap(), one);
        assert_eq!(mgr.allocate(&hw("b"), 0), Err(LeaseError::PoolExhausted));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// No two simultaneously active leases ever share an address.
        #[test]
        fn no_duplicate_addresses(names in proptest::collection::vec("[a-z]{1,8}", 1..32)) {
            let mut mgr = LeaseManager::new(
                Addr::new(10, 0, 0, 1),
                Addr::new(10, 0, 0, 64),
                3600,
            );
            for name in &names {
                let _ = mgr.allocate(&HardwareId::new(name.clone()), 0);
            }
            let mut addrs: Vec<Addr> = mgr.iter().map(|(_, l)| l.address).collect();
            let total = addrs.len();
            addrs.sort();
            addrs.dedup();
            prop_assert_eq!(addrs.len(), total);
        }
    }
}
