//! Engine error types.
//!
//! None of these are fatal to the node: exhaustion is reported back to
//! the requester, unreachable destinations produce best-effort error
//! packets, and stale state is swept rather than surfaced.

/// Errors from lease allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("address pool exhausted")]
    PoolExhausted,
}

/// Errors from NAT translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NatError {
    #[error("external port range exhausted")]
    PortsExhausted,

    #[error("no mapping for external port")]
    NoMapping,
}
