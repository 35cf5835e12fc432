//! Actions produced by the engines.
//!
//! Engines never touch the link layer or storage directly; every frame
//! is processed into a list of actions that the node runtime performs.
//! This keeps the decision logic synchronous and fully testable.

use softroute_core::packet::RouteUpdate;
use softroute_core::types::{Addr, HardwareId};

/// An effect for the node runtime to carry out, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Transmit a frame to one link-layer identity.
    Deliver { to: HardwareId, raw: Vec<u8> },
    /// Transmit a frame toward the backbone uplink.
    SendUplink { raw: Vec<u8> },
    /// Broadcast a frame to every reachable identity.
    Broadcast { raw: Vec<u8> },
    /// The backbone assigned this node's external address; the runtime
    /// writes it back to the configuration store.
    AssignedAddress { address: Addr },
    /// Append a route change to the write-ahead log. Always emitted
    /// before any send action for the same change.
    PersistRoute(RouteUpdate),
}
