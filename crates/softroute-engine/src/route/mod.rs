//! Path-vector routing: table, selection, and staleness sweep.

pub mod table;
pub mod types;

pub use table::RouteTable;
pub use types::{ApplyOutcome, RejectReason, RouteEntry};
