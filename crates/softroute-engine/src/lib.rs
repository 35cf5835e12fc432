//! Stateful tables and forwarding engines for softroute nodes.
//!
//! Everything here is synchronous and I/O-free. The two engines,
//! [`RouterEngine`] and [`BackboneEngine`], own their tables and turn
//! inbound frames into [`Action`] lists; the node runtime owns the
//! clock, the link layer, and storage.

pub mod action;
pub mod backbone;
pub mod clients;
pub mod dedup;
pub mod error;
pub mod lease;
pub mod nat;
pub mod route;
pub mod router;

pub use action::Action;
pub use backbone::{BackboneConfig, BackboneEngine, BackboneSweepReport};
pub use clients::{ClientEntry, ClientTable};
pub use dedup::DuplicateFilter;
pub use error::{LeaseError, NatError};
pub use lease::{Lease, LeaseManager};
pub use nat::{NatEntry, NatTable};
pub use route::{ApplyOutcome, RejectReason, RouteEntry, RouteTable};
pub use router::{RouterConfig, RouterEngine, SweepReport};
