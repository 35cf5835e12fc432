//! Core types for softroute nodes.
//!
//! This crate defines the packet model, address arithmetic, and wire
//! codec shared by the routing engines and the node runtime. It has no
//! I/O and no clock; everything here is deterministic.

pub mod codec;
pub mod constants;
pub mod error;
pub mod packet;
pub mod types;

pub use error::CodecError;
pub use packet::{
    Body, ControlMessage, Datagram, ErrorInfo, ErrorKind, Packet, Payload, RouteOp, RouteUpdate,
};
pub use types::{Addr, AddrParseError, Cidr, HardwareId, PacketId};
