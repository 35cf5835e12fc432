//! TOML-based configuration for softroute nodes.
//!
//! Addresses and prefixes are kept as strings in the file and parsed
//! into typed engine configuration on demand, so a typo is reported at
//! startup with the offending value.

use std::path::Path;

use serde::Deserialize;

use softroute_core::constants::{
    DEFAULT_LEASE_DURATION, DEFAULT_NAT_TIMEOUT, DEFAULT_ROUTE_MAX_AGE, DEFAULT_SEEN_CAPACITY,
    DEFAULT_SEEN_MAX_AGE,
};
use softroute_core::types::{Addr, Cidr, HardwareId};
use softroute_engine::{BackboneConfig, RouterConfig};

use crate::error::NodeError;

/// Top-level node configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub backbone: BackboneSection,
}

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))
    }

    /// Typed engine configuration for router mode.
    pub fn router_config(&self) -> Result<RouterConfig, NodeError> {
        let r = &self.router;
        if r.nat_range[0] > r.nat_range[1] {
            return Err(NodeError::Config(format!(
                "router.nat_range: start {} exceeds end {}",
                r.nat_range[0], r.nat_range[1]
            )));
        }
        Ok(RouterConfig {
            subnet: parse_cidr("router.subnet", &r.subnet)?,
            external_address: parse_addr("router.external_address", &r.external_address)?,
            pool_first: parse_addr("router.pool_first", &r.pool_first)?,
            pool_last: parse_addr("router.pool_last", &r.pool_last)?,
            lease_timeout: r.lease_timeout,
            nat_range: (r.nat_range[0], r.nat_range[1]),
            nat_timeout: r.nat_timeout,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
            seen_max_age: DEFAULT_SEEN_MAX_AGE,
        })
    }

    /// Typed engine configuration for backbone mode.
    pub fn backbone_config(&self) -> Result<BackboneConfig, NodeError> {
        let b = &self.backbone;
        let subnets = b
            .subnets
            .iter()
            .map(|s| parse_cidr("backbone.subnets", s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BackboneConfig {
            address: parse_addr("backbone.address", &b.address)?,
            subnets,
            peers: b.peers.iter().map(|p| HardwareId::new(p.as_str())).collect(),
            route_max_age: b.route_max_age,
            client_timeout: b.client_timeout,
            seen_capacity: DEFAULT_SEEN_CAPACITY,
            seen_max_age: DEFAULT_SEEN_MAX_AGE,
        })
    }
}

fn parse_addr(key: &str, value: &str) -> Result<Addr, NodeError> {
    value
        .parse()
        .map_err(|e| NodeError::Config(format!("{key}: {e}")))
}

fn parse_cidr(key: &str, value: &str) -> Result<Cidr, NodeError> {
    value
        .parse()
        .map_err(|e| NodeError::Config(format!("{key}: {e}")))
}

/// Which engine this node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Router,
    Backbone,
}

/// The `[node]` section.
#[derive(Debug, Deserialize)]
pub struct NodeSection {
    #[serde(default)]
    pub mode: NodeMode,
    /// Interval in seconds between periodic state persistence. 0 disables. Default: 300.
    #[serde(default = "default_persist_interval")]
    pub persist_interval: u64,
    /// Interval in seconds between maintenance sweeps. Default: 5.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
    /// Custom storage directory path.
    pub storage_path: Option<String>,
    /// Whether to enable persistent storage. Default: true.
    #[serde(default = "default_enable_storage")]
    pub enable_storage: bool,
}

fn default_persist_interval() -> u64 {
    300
}

fn default_sweep_interval() -> u64 {
    5
}

fn default_enable_storage() -> bool {
    true
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            mode: NodeMode::Router,
            persist_interval: default_persist_interval(),
            sweep_interval: default_sweep_interval(),
            storage_path: None,
            enable_storage: default_enable_storage(),
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// The `[router]` section.
#[derive(Debug, Deserialize)]
pub struct RouterSection {
    #[serde(default = "default_subnet")]
    pub subnet: String,
    #[serde(default = "default_external_address")]
    pub external_address: String,
    #[serde(default = "default_pool_first")]
    pub pool_first: String,
    #[serde(default = "default_pool_last")]
    pub pool_last: String,
    /// Lease lifetime in seconds. Default: 3600.
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout: u64,
    /// Inclusive external port range for NAT.
    #[serde(default = "default_nat_range")]
    pub nat_range: [u16; 2],
    /// NAT idle timeout in seconds. Default: 300.
    #[serde(default = "default_nat_timeout")]
    pub nat_timeout: u64,
    /// Link-layer identity of the backbone uplink.
    #[serde(default = "default_uplink")]
    pub uplink: String,
}

fn default_subnet() -> String {
    "10.0.0.0/24".to_string()
}

fn default_external_address() -> String {
    "80.0.0.2".to_string()
}

fn default_pool_first() -> String {
    "10.0.0.10".to_string()
}

fn default_pool_last() -> String {
    "10.0.0.250".to_string()
}

fn default_lease_timeout() -> u64 {
    DEFAULT_LEASE_DURATION
}

fn default_nat_range() -> [u16; 2] {
    [20_000, 29_999]
}

fn default_nat_timeout() -> u64 {
    DEFAULT_NAT_TIMEOUT
}

fn default_uplink() -> String {
    "uplink".to_string()
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            subnet: default_subnet(),
            external_address: default_external_address(),
            pool_first: default_pool_first(),
            pool_last: default_pool_last(),
            lease_timeout: default_lease_timeout(),
            nat_range: default_nat_range(),
            nat_timeout: default_nat_timeout(),
            uplink: default_uplink(),
        }
    }
}

/// The `[backbone]` section.
#[derive(Debug, Deserialize)]
pub struct BackboneSection {
    #[serde(default = "default_backbone_subnets")]
    pub subnets: Vec<String>,
    #[serde(default = "default_backbone_address")]
    pub address: String,
    /// Peer identities probed by keepalives.
    #[serde(default)]
    pub peers: Vec<String>,
    /// Route staleness bound in seconds. Default: 900.
    #[serde(default = "default_route_max_age")]
    pub route_max_age: u64,
    /// Client registration idle timeout in seconds. Default: 600.
    #[serde(default = "default_client_timeout")]
    pub client_timeout: u64,
    /// Keepalive probe interval in seconds. Default: 30.
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval: u64,
    /// Compact the route write-ahead log into a snapshot every N appends.
    #[serde(default = "default_wal_snapshot_every")]
    pub wal_snapshot_every: u64,
}

fn default_backbone_subnets() -> Vec<String> {
    vec!["80.0.0.0/16".to_string()]
}

fn default_backbone_address() -> String {
    "80.0.0.1".to_string()
}

fn default_route_max_age() -> u64 {
    DEFAULT_ROUTE_MAX_AGE
}

fn default_client_timeout() -> u64 {
    600
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_wal_snapshot_every() -> u64 {
    64
}

impl Default for BackboneSection {
    fn default() -> Self {
        Self {
            subnets: default_backbone_subnets(),
            address: default_backbone_address(),
            peers: Vec::new(),
            route_max_age: default_route_max_age(),
            client_timeout: default_client_timeout(),
            keepalive_interval: default_keepalive_interval(),
            wal_snapshot_every: default_wal_snapshot_every(),
        }
    }
}

/// Write the backbone-assigned external address back into the config
/// file so it survives a restart. Atomic (`.tmp` + rename).
pub fn store_assigned_address(path: &Path, address: Addr) -> Result<(), NodeError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
    let mut doc: toml::Table = content
        .parse()
        .map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))?;

    let router = doc
        .entry("router")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    match router {
        toml::Value::Table(table) => {
            table.insert(
                "external_address".to_string(),
                toml::Value::String(address.to_string()),
            );
        }
        _ => return Err(NodeError::Config("[router] is not a table".to_string())),
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, toml::to_string_pretty(&doc).map_err(|e| {
        NodeError::Config(format!("failed to serialize config: {e}"))
    })?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
