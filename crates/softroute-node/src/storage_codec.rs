//! Pure serialization/deserialization for node state.
//!
//! Extracts the data-transformation logic from [`crate::storage`] so
//! that lease, NAT, and route codecs can be tested without async I/O or
//! temp dirs.
//!
//! Formats:
//! - Lease table: one line per lease, `identity:address:issued_at:duration`
//!   with integer seconds.
//! - NAT and route tables: postcard through storable intermediate structs.
//! - Route write-ahead log: one line per update,
//!   `operation prefix next_hop origin metric sequence` (next hop is `-`
//!   on withdrawal).

use serde::{Deserialize, Serialize};

use softroute_core::packet::{RouteOp, RouteUpdate};
use softroute_core::types::{Addr, Cidr, HardwareId};
use softroute_engine::lease::Lease;
use softroute_engine::nat::NatEntry;
use softroute_engine::route::RouteEntry;

/// Errors from pure codec operations (no I/O variants).
#[derive(Debug, thiserror::Error)]
pub enum StorageCodecError {
    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

// === Lease table ===

/// Render the lease table as text lines.
#[must_use]
pub fn leases_to_lines<'a>(
    leases: impl Iterator<Item = (&'a HardwareId, &'a Lease)>,
) -> String {
    let mut out = String::new();
    for (identity, lease) in leases {
        out.push_str(&format!(
            "{}:{}:{}:{}\n",
            identity, lease.address, lease.issued_at, lease.duration
        ));
    }
    out
}

/// Parse the lease-table text format.
///
/// The identity may itself contain `:`; the three trailing fields are
/// split from the right.
pub fn leases_from_lines(text: &str) -> Result<Vec<(HardwareId, Lease)>, StorageCodecError> {
    let mut entries = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.rsplitn(4, ':');
        let duration = fields.next();
        let issued_at = fields.next();
        let address = fields.next();
        let identity = fields.next();
        let (Some(duration), Some(issued_at), Some(address), Some(identity)) =
            (duration, issued_at, address, identity)
        else {
            return Err(StorageCodecError::Deserialize(format!(
                "malformed lease line: {line:?}"
            )));
        };
        let address: Addr = address
            .parse()
            .map_err(|e| StorageCodecError::Deserialize(format!("lease address: {e}")))?;
        let issued_at: u64 = issued_at
            .parse()
            .map_err(|_| StorageCodecError::Deserialize(format!("lease issued_at: {line:?}")))?;
        let duration: u64 = duration
            .parse()
            .map_err(|_| StorageCodecError::Deserialize(format!("lease duration: {line:?}")))?;
        entries.push((
            HardwareId::new(identity),
            Lease {
                address,
                issued_at,
                duration,
            },
        ));
    }
    Ok(entries)
}

// === NAT table ===

/// Intermediate representation of a NAT entry for serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct StorableNatEntry {
    pub external_port: u16,
    pub internal_addr: u32,
    pub internal_port: u16,
    pub identity: String,
    pub last_used: u64,
}

/// Serialize the NAT table's reverse map.
pub fn serialize_nat<'a>(
    entries: impl Iterator<Item = (u16, &'a NatEntry)>,
) -> Result<Vec<u8>, StorageCodecError> {
    let storable: Vec<StorableNatEntry> = entries
        .map(|(port, entry)| StorableNatEntry {
            external_port: port,
            internal_addr: entry.internal_addr.to_u32(),
            internal_port: entry.internal_port,
            identity: entry.identity.as_str().to_string(),
            last_used: entry.last_used,
        })
        .collect();
    postcard::to_allocvec(&storable).map_err(|e| StorageCodecError::Serialize(e.to_string()))
}

/// Deserialize NAT entries.
pub fn deserialize_nat(bytes: &[u8]) -> Result<Vec<(u16, NatEntry)>, StorageCodecError> {
    let storable: Vec<StorableNatEntry> =
        postcard::from_bytes(bytes).map_err(|e| StorageCodecError::Deserialize(e.to_string()))?;
    Ok(storable
        .into_iter()
        .map(|s| {
            (
                s.external_port,
                NatEntry {
                    internal_addr: Addr::from_u32(s.internal_addr),
                    internal_port: s.internal_port,
                    identity: HardwareId::new(s.identity),
                    last_used: s.last_used,
                },
            )
        })
        .collect())
}

// === Route table ===

/// Intermediate representation of a route entry for serialization.
#[derive(Debug, Serialize, Deserialize)]
pub struct StorableRouteEntry {
    pub network: u32,
    pub prefix_len: u8,
    pub origin: String,
    pub next_hop: u32,
    pub metric: u32,
    pub sequence: u64,
    pub timestamp: u64,
}

/// Serialize route entries.
pub fn serialize_routes<'a>(
    entries: impl Iterator<Item = &'a RouteEntry>,
) -> Result<Vec<u8>, StorageCodecError> {
    let storable: Vec<StorableRouteEntry> = entries
        .map(|entry| StorableRouteEntry {
            network: entry.prefix.network().to_u32(),
            prefix_len: entry.prefix.prefix_len(),
            origin: entry.origin.clone(),
            next_hop: entry.next_hop.to_u32(),
            metric: entry.metric,
            sequence: entry.sequence,
            timestamp: entry.timestamp,
        })
        .collect();
    postcard::to_allocvec(&storable).map_err(|e| StorageCodecError::Serialize(e.to_string()))
}

/// Deserialize route entries.
pub fn deserialize_routes(bytes: &[u8]) -> Result<Vec<RouteEntry>, StorageCodecError> {
    let storable: Vec<StorableRouteEntry> =
        postcard::from_bytes(bytes).map_err(|e| StorageCodecError::Deserialize(e.to_string()))?;
    storable
        .into_iter()
        .map(|s| {
            let prefix = Cidr::new(Addr::from_u32(s.network), s.prefix_len).ok_or_else(|| {
                StorageCodecError::Deserialize(format!("bad prefix length: {}", s.prefix_len))
            })?;
            Ok(RouteEntry {
                prefix,
                origin: s.origin,
                next_hop: Addr::from_u32(s.next_hop),
                metric: s.metric,
                sequence: s.sequence,
                timestamp: s.timestamp,
            })
        })
        .collect()
}

// === Route write-ahead log ===

/// Render one route update as a WAL line (without trailing newline).
#[must_use]
pub fn wal_line(update: &RouteUpdate) -> String {
    let op = match update.op {
        RouteOp::Announce => "announce",
        RouteOp::Withdraw => "withdraw",
    };
    let next_hop = match update.next_hop {
        Some(addr) => addr.to_string(),
        None => "-".to_string(),
    };
    format!(
        "{op} {} {next_hop} {} {} {}",
        update.prefix, update.origin, update.metric, update.sequence
    )
}

/// Parse one WAL line back into a route update.
pub fn parse_wal_line(line: &str) -> Result<RouteUpdate, StorageCodecError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let [op, prefix, next_hop, origin, metric, sequence] = fields.as_slice() else {
        return Err(StorageCodecError::Deserialize(format!(
            "malformed WAL line: {line:?}"
        )));
    };
    let op = match *op {
        "announce" => RouteOp::Announce,
        "withdraw" => RouteOp::Withdraw,
        other => {
            return Err(StorageCodecError::Deserialize(format!(
                "unknown WAL operation: {other:?}"
            )))
        }
    };
    let prefix: Cidr = prefix
        .parse()
        .map_err(|e| StorageCodecError::Deserialize(format!("WAL prefix: {e}")))?;
    let next_hop = match *next_hop {
        "-" => None,
        addr => Some(
            addr.parse::<Addr>()
                .map_err(|e| StorageCodecError::Deserialize(format!("WAL next hop: {e}")))?,
        ),
    };
    let metric: u32 = metric
        .parse()
        .map_err(|_| StorageCodecError::Deserialize(format!("WAL metric: {line:?}")))?;
    let sequence: u64 = sequence
        .parse()
        .map_err(|_| StorageCodecError::Deserialize(format!("WAL sequence: {line:?}")))?;
    Ok(RouteUpdate {
        op,
        prefix,
        origin: origin.to_string(),
        next_hop,
        metric,
        sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use softroute_engine::route::RouteTable;

    #[test]
    fn test_lease_lines_roundtrip() {
        let text = leases_to_lines(
            vec![
                (
                    &HardwareId::new("host-a"),
                    &Lease {
                        address: Addr::new(10, 0, 0, 10),
                        issued_at: 100,
                        duration: 3_600,
                    },
                ),
                (
                    &HardwareId::new("rack:2:slot:7"),
                    &Lease {
                        address: Addr::new(10, 0, 0, 11),
                        issued_at: 200,
                        duration: 60,
                    },
                ),
            ]
            .into_iter(),
        );

        let entries = leases_from_lines(&text).unwrap();
        assert_eq!(entries.len(), 2);
        // Colons inside the identity survive the round trip.
        assert_eq!(entries[1].0, HardwareId::new("rack:2:slot:7"));
        assert_eq!(entries[1].1.address, Addr::new(10, 0, 0, 11));
        assert_eq!(entries[0].1.issued_at, 100);
    }

    #[test]
    fn test_lease_lines_reject_garbage() {
        assert!(leases_from_lines("host-a:10.0.0.10:not-a-number:60").is_err());
        assert!(leases_from_lines("just-one-field").is_err());
    }

    #[test]
    fn test_lease_lines_skip_blank() {
        assert!(leases_from_lines("\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_nat_roundtrip() {
        let entry = NatEntry {
            internal_addr: Addr::new(10, 0, 0, 10),
            internal_port: 40_000,
            identity: HardwareId::new("host-a"),
            last_used: 500,
        };
        let bytes = serialize_nat(vec![(20_000, &entry)].into_iter()).unwrap();
        let entries = deserialize_nat(&bytes).unwrap();
        assert_eq!(entries, vec![(20_000, entry)]);
    }

    #[test]
    fn test_route_roundtrip() {
        let entry = RouteEntry {
            prefix: "44.0.0.0/8".parse().unwrap(),
            origin: "isp-b".to_string(),
            next_hop: Addr::new(80, 0, 0, 9),
            metric: 2,
            sequence: 7,
            timestamp: 1_000,
        };
        let table = RouteTable::from_entries(vec![entry.clone()]);
        let bytes = serialize_routes(table.iter()).unwrap();
        let entries = deserialize_routes(&bytes).unwrap();
        assert_eq!(entries, vec![entry]);
    }

    #[test]
    fn test_wal_line_roundtrip() {
        let announce = RouteUpdate {
            op: RouteOp::Announce,
            prefix: "44.0.0.0/8".parse().unwrap(),
            origin: "isp-b".to_string(),
            next_hop: Some(Addr::new(80, 0, 0, 9)),
            metric: 2,
            sequence: 7,
        };
        assert_eq!(parse_wal_line(&wal_line(&announce)).unwrap(), announce);

        let withdraw = RouteUpdate {
            op: RouteOp::Withdraw,
            prefix: "44.0.0.0/8".parse().unwrap(),
            origin: "isp-b".to_string(),
            next_hop: None,
            metric: 0,
            sequence: 8,
        };
        let line = wal_line(&withdraw);
        assert!(line.starts_with("withdraw 44.0.0.0/8 -"));
        assert_eq!(parse_wal_line(&line).unwrap(), withdraw);
    }

    #[test]
    fn test_wal_rejects_garbage() {
        assert!(parse_wal_line("flood 44.0.0.0/8 - isp-b 0 1").is_err());
        assert!(parse_wal_line("announce 44.0.0.0/8").is_err());
        assert!(parse_wal_line("").is_err());
    }
}
