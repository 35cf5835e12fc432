//! The framed packet model.
//!
//! A [`Packet`] is the unit of exchange on the link layer. Control
//! messages are a tagged union decoded once at the boundary; call sites
//! match on [`ControlMessage`] variants instead of probing string-keyed
//! payload tables.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_TTL, PROTOCOL_VERSION};
use crate::types::{Addr, Cidr, PacketId};

/// A framed packet as seen by both engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Packet {
    /// Protocol version, checked against [`PROTOCOL_VERSION`] on decode.
    pub version: u8,
    /// Collision-resistant identifier, the duplicate-filter key.
    pub id: PacketId,
    /// Hop budget; the packet is discarded when it reaches zero.
    pub ttl: u8,
    /// Declared source address.
    pub src: Addr,
    /// Declared destination address.
    pub dst: Addr,
    pub payload: Payload,
}

impl Packet {
    /// Build a packet with a fresh id, the current protocol version,
    /// and the default TTL.
    pub fn new(src: Addr, dst: Addr, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id: PacketId::random(),
            ttl: DEFAULT_TTL,
            src,
            dst,
            payload,
        }
    }

    /// The datagram inside a DATA payload, if this is one.
    #[must_use]
    pub fn datagram(&self) -> Option<&Datagram> {
        match &self.payload {
            Payload::Data(d) => Some(d),
            _ => None,
        }
    }

    /// The control message inside a DATA payload, if this is one.
    #[must_use]
    pub fn control(&self) -> Option<&ControlMessage> {
        match &self.payload {
            Payload::Data(Datagram {
                body: Body::Control(msg),
                ..
            }) => Some(msg),
            _ => None,
        }
    }
}

/// Top-level packet payload, one variant per wire packet type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Ordinary traffic, or a control message riding inside a datagram.
    Data(Datagram),
    /// A route announce or withdraw.
    Route(RouteUpdate),
    /// Keepalive probe.
    Ping { seq: u64 },
    /// Best-effort error report toward an originator.
    Error(ErrorInfo),
}

/// Addressed data with port fields for translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    pub src_port: u16,
    pub dst_port: u16,
    /// The pre-translation source port, preserved for diagnostics when
    /// NAT rewrites `src_port`.
    pub original_src_port: Option<u16>,
    pub body: Body,
}

impl Datagram {
    /// An opaque datagram with no prior translation.
    pub fn opaque(src_port: u16, dst_port: u16, bytes: Vec<u8>) -> Self {
        Self {
            src_port,
            dst_port,
            original_src_port: None,
            body: Body::Opaque(bytes),
        }
    }

    /// A control-message datagram. Control traffic rides on port 0.
    pub fn control(msg: ControlMessage) -> Self {
        Self {
            src_port: 0,
            dst_port: 0,
            original_src_port: None,
            body: Body::Control(msg),
        }
    }
}

/// Datagram body: either a decoded control message or opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Control(ControlMessage),
    Opaque(Vec<u8>),
}

/// Control-message subtypes carried inside a DATA payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Host asks the router for a private address.
    LeaseRequest,
    /// Host gives its private address back.
    LeaseRelease,
    /// Router grants a lease.
    LeaseAck { address: Addr },
    /// Router refuses a lease.
    LeaseNak { reason: String },
    /// Downstream router registers with the backbone, claiming an
    /// external address.
    RegisterHello { claimed_address: Addr },
    /// Backbone accepts the registration.
    RegisterAck { assigned_address: Addr },
    /// Backbone refuses the registration.
    RegisterNak { reason: String },
}

/// A path-vector announce or withdraw for one prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteUpdate {
    pub op: RouteOp,
    pub prefix: Cidr,
    /// Identity of the announcing provider.
    pub origin: String,
    /// Absent on withdrawal.
    pub next_hop: Option<Addr>,
    pub metric: u32,
    /// Monotonically increasing per origin; stale sequences are ignored.
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteOp {
    Announce,
    Withdraw,
}

/// Error report payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Optional extra context, e.g. the address that was unreachable.
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The hop budget ran out before delivery.
    TtlExpired,
    /// No route toward the destination.
    Unreachable,
    /// The destination address has no known lease or registration.
    DestinationUnknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_packet_defaults() {
        let p = Packet::new(
            Addr::new(10, 0, 0, 1),
            Addr::new(10, 0, 0, 2),
            Payload::Ping { seq: 1 },
        );
        assert_eq!(p.version, PROTOCOL_VERSION);
        assert_eq!(p.ttl, DEFAULT_TTL);
    }

    #[test]
    fn test_control_accessor() {
        let p = Packet::new(
            Addr::new(0, 0, 0, 0),
            Addr::new(10, 0, 0, 1),
            Payload::Data(Datagram::control(ControlMessage::LeaseRequest)),
        );
        assert_eq!(p.control(), Some(&ControlMessage::LeaseRequest));
    }

    #[test]
    fn test_control_accessor_none_for_opaque() {
        let p = Packet::new(
            Addr::new(10, 0, 0, 1),
            Addr::new(10, 0, 0, 2),
            Payload::Data(Datagram::opaque(40_000, 80, vec![1, 2, 3])),
        );
        assert!(p.control().is_none());
        assert!(p.datagram().is_some());
    }

    #[test]
    fn test_fresh_ids_differ() {
        let a = Packet::new(
            Addr::new(10, 0, 0, 1),
            Addr::new(10, 0, 0, 2),
            Payload::Ping { seq: 1 },
        );
        let b = Packet::new(
            Addr::new(10, 0, 0, 1),
            Addr::new(10, 0, 0, 2),
            Payload::Ping { seq: 1 },
        );
        assert_ne!(a.id, b.id);
    }
}
