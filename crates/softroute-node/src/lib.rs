//! Node runtime for softroute: configuration, logging, persistence,
//! the in-memory link layer, and the event loop around an engine.

pub mod config;
pub mod error;
pub mod link;
pub mod logging;
pub mod node;
pub mod storage;
pub mod storage_codec;

pub use config::{NodeConfig, NodeMode};
pub use error::NodeError;
pub use link::{Link, LinkEvent, Wire};
pub use node::{Node, ShutdownHandle};
pub use storage::Storage;
