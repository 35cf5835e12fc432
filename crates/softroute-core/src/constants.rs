//! Protocol constants shared by every softroute node.

/// Wire protocol version; packets carrying any other value are dropped.
pub const PROTOCOL_VERSION: u8 = 2;

/// Default TTL stamped on locally originated packets.
pub const DEFAULT_TTL: u8 = 16;

/// Default lease duration in seconds.
pub const DEFAULT_LEASE_DURATION: u64 = 3_600;

/// Default idle timeout for NAT mappings in seconds.
pub const DEFAULT_NAT_TIMEOUT: u64 = 300;

/// Default maximum route age before staleness sweep, in seconds.
pub const DEFAULT_ROUTE_MAX_AGE: u64 = 900;

/// Default capacity of the duplicate-suppression filter.
pub const DEFAULT_SEEN_CAPACITY: usize = 4_096;

/// Default age limit for duplicate-filter entries, in seconds.
pub const DEFAULT_SEEN_MAX_AGE: u64 = 120;
