//! Route table types.

use softroute_core::packet::{RouteOp, RouteUpdate};
use softroute_core::types::{Addr, Cidr};

/// One origin's route for a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub prefix: Cidr,
    /// Identity of the announcing provider.
    pub origin: String,
    /// Next hop toward the prefix; `None` never appears in the table
    /// (withdrawals remove entries instead).
    pub next_hop: Addr,
    pub metric: u32,
    /// Monotonically increasing per origin.
    pub sequence: u64,
    /// Monotonic seconds when the entry was last applied.
    pub timestamp: u64,
}

impl RouteEntry {
    /// Check if this entry is stale at the given time.
    ///
    /// Uses strict `>` comparison.
    #[must_use]
    pub fn is_stale(&self, now: u64, max_age: u64) -> bool {
        now.saturating_sub(self.timestamp) > max_age
    }
}

/// Outcome of applying an announce or withdraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The table changed.
    Applied,
    /// The message was valid but stale or redundant; no mutation.
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Sequence lower than the stored entry for this origin.
    StaleSequence { stored: u64, incoming: u64 },
    /// Announce without a next hop, or an origin that is not a single
    /// non-empty token.
    Malformed(&'static str),
    /// Withdraw for an origin with no entry under the prefix.
    UnknownEntry,
}

/// Validate a wire update before it touches the table.
///
/// Origins must be single whitespace-free tokens: the route log is
/// line-oriented with whitespace-delimited fields, and an origin that
/// breaks that framing would not survive a replay.
pub(crate) fn validate(update: &RouteUpdate) -> Result<(), RejectReason> {
    if update.origin.is_empty() {
        return Err(RejectReason::Malformed("empty origin"));
    }
    if update.origin.chars().any(char::is_whitespace) {
        return Err(RejectReason::Malformed("origin contains whitespace"));
    }
    if update.op == RouteOp::Announce && update.next_hop.is_none() {
        return Err(RejectReason::Malformed("announce without next hop"));
    }
    Ok(())
}
