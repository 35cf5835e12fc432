//! Newtype wrappers for addresses and identifiers.
//!
//! These types provide type safety, preventing accidental mixing of
//! addresses, subnets, and link-layer identities that would otherwise
//! all be plain strings or integers.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// A 32-bit dotted-quad network address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[must_use]
pub struct Addr(pub(crate) u32);

impl Addr {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(u32::from_be_bytes([a, b, c, d]))
    }

    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn to_u32(self) -> u32 {
        self.0
    }

    /// The next address in numeric order, saturating at the top of the space.
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0.to_be_bytes();
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Addr({self})")
    }
}

/// Error returned when parsing an [`Addr`] or [`Cidr`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrParseError {
    #[error("expected four dotted-quad octets: {0:?}")]
    BadQuad(String),

    #[error("octet out of range: {0:?}")]
    BadOctet(String),

    #[error("expected address/prefix notation: {0:?}")]
    BadCidr(String),

    #[error("prefix length out of range: {0}")]
    BadPrefixLen(u8),
}

impl FromStr for Addr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for slot in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| AddrParseError::BadQuad(s.to_string()))?;
            *slot = part
                .parse::<u8>()
                .map_err(|_| AddrParseError::BadOctet(part.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddrParseError::BadQuad(s.to_string()));
        }
        Ok(Self(u32::from_be_bytes(octets)))
    }
}

/// A network prefix in CIDR notation.
///
/// The network address is canonicalized on construction: host bits are
/// always zero, so two `Cidr` values covering the same prefix compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use]
pub struct Cidr {
    network: Addr,
    prefix_len: u8,
}

impl Cidr {
    /// Create a prefix, zeroing any host bits in `addr`.
    ///
    /// Returns `None` if `prefix_len > 32`.
    pub fn new(addr: Addr, prefix_len: u8) -> Option<Self> {
        if prefix_len > 32 {
            return None;
        }
        Some(Self {
            network: Addr(addr.0 & Self::mask(prefix_len)),
            prefix_len,
        })
    }

    const fn mask(prefix_len: u8) -> u32 {
        if prefix_len == 0 {
            0
        } else {
            u32::MAX << (32 - prefix_len)
        }
    }

    /// The canonical network address (host bits zeroed).
    pub const fn network(&self) -> Addr {
        self.network
    }

    #[must_use]
    pub const fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `addr` falls inside this prefix.
    #[must_use]
    pub const fn contains(&self, addr: Addr) -> bool {
        addr.0 & Self::mask(self.prefix_len) == self.network.0
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl fmt::Debug for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cidr({self})")
    }
}

impl FromStr for Cidr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, len_part) = s
            .split_once('/')
            .ok_or_else(|| AddrParseError::BadCidr(s.to_string()))?;
        let addr: Addr = addr_part.parse()?;
        let prefix_len: u8 = len_part
            .parse()
            .map_err(|_| AddrParseError::BadCidr(s.to_string()))?;
        Self::new(addr, prefix_len).ok_or(AddrParseError::BadPrefixLen(prefix_len))
    }
}

/// An opaque link-layer identity (hardware id) of a host or peer node.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[must_use]
pub struct HardwareId(pub(crate) String);

impl HardwareId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareId({})", self.0)
    }
}

impl From<&str> for HardwareId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A 16-byte collision-resistant packet identifier.
///
/// Used as the duplicate-filter key; generated randomly at packet
/// construction and carried unchanged across hops.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use]
pub struct PacketId(pub(crate) [u8; 16]);

impl PacketId {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl AsRef<[u8]> for PacketId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PacketId({:02x}{:02x}{:02x}{:02x}..)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}
