//! The edge router's per-frame decision logic.
//!
//! [`RouterEngine`] owns the lease, NAT, and duplicate-suppression
//! tables for one private subnet. It performs no I/O: every inbound
//! frame is processed into a list of [`Action`]s for the node runtime
//! to carry out.

use tracing::{debug, info, warn};

use softroute_core::codec::{self, build_error_packet};
use softroute_core::packet::{ControlMessage, Datagram, ErrorKind, Packet, Payload};
use softroute_core::types::{Addr, Cidr, HardwareId};

use crate::action::Action;
use crate::dedup::DuplicateFilter;
use crate::lease::LeaseManager;
use crate::nat::NatTable;

/// Static configuration for one edge router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// The private subnet this router serves.
    pub subnet: Cidr,
    /// The router's address on the external network.
    pub external_address: Addr,
    /// Inclusive lease pool bounds, both inside `subnet`.
    pub pool_first: Addr,
    pub pool_last: Addr,
    /// Lease lifetime and idle-sweep timeout, in seconds.
    pub lease_timeout: u64,
    /// Inclusive external port range for NAT.
    pub nat_range: (u16, u16),
    /// NAT idle timeout in seconds.
    pub nat_timeout: u64,
    /// Duplicate filter capacity and age bound.
    pub seen_capacity: usize,
    pub seen_max_age: u64,
}

/// Counts removed by one maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub leases: usize,
    pub nat: usize,
    pub seen: usize,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.leases + self.nat + self.seen
    }
}

/// The edge node: leases private addresses, translates outbound flows,
/// and forwards everything else.
#[must_use]
pub struct RouterEngine {
    config: RouterConfig,
    leases: LeaseManager,
    nat: NatTable,
    seen: DuplicateFilter,
    /// Set once the backbone has acknowledged our registration; uplink
    /// traffic is refused until then.
    uplink_registered: bool,
}

impl RouterEngine {
    pub fn new(config: RouterConfig) -> Self {
        let leases = LeaseManager::new(config.pool_first, config.pool_last, config.lease_timeout);
        let nat = NatTable::new(config.nat_range.0, config.nat_range.1);
        let seen = DuplicateFilter::new(config.seen_capacity);
        Self {
            config,
            leases,
            nat,
            seen,
            uplink_registered: false,
        }
    }

    /// Restore an engine from persisted tables.
    pub fn with_state(config: RouterConfig, leases: LeaseManager, nat: NatTable) -> Self {
        let seen = DuplicateFilter::new(config.seen_capacity);
        Self {
            config,
            leases,
            nat,
            seen,
            uplink_registered: false,
        }
    }

    #[must_use]
    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    #[must_use]
    pub fn nat(&self) -> &NatTable {
        &self.nat
    }

    #[must_use]
    pub fn external_address(&self) -> Addr {
        self.config.external_address
    }

    #[must_use]
    pub fn uplink_registered(&self) -> bool {
        self.uplink_registered
    }

    /// Build the registration hello to send toward the backbone.
    pub fn hello_uplink(&self) -> Vec<Action> {
        let packet = Packet::new(
            self.config.external_address,
            Addr::from_u32(0),
            Payload::Data(Datagram::control(ControlMessage::RegisterHello {
                claimed_address: self.config.external_address,
            })),
        );
        match codec::encode(&packet) {
            Ok(raw) => vec![Action::SendUplink { raw }],
            Err(error) => {
                warn!(%error, "failed to encode registration hello");
                Vec::new()
            }
        }
    }

    /// Process one inbound frame into actions.
    pub fn handle_frame(&mut self, from: &HardwareId, raw: &[u8], now: u64) -> Vec<Action> {
        let mut packet = match codec::decode(raw) {
            Ok(packet) => packet,
            Err(error) => {
                warn!(%from, %error, "dropping undecodable frame");
                return Vec::new();
            }
        };

        if self.seen.contains(&packet.id) {
            debug!(id = %packet.id, "dropping duplicate frame");
            return Vec::new();
        }
        self.seen.touch(packet.id, now);

        if let Some(msg) = packet.control() {
            let msg = msg.clone();
            return self.handle_control(from, msg, now);
        }

        if packet.ttl == 0 {
            debug!(id = %packet.id, src = %packet.src, "frame arrived with exhausted ttl");
            return self.error_toward(
                packet.src,
                ErrorKind::TtlExpired,
                "ttl reached zero",
                Some(packet.dst.to_string()),
            );
        }

        let src_local = self.config.subnet.contains(packet.src);
        let dst_local = self.config.subnet.contains(packet.dst);

        if src_local && dst_local {
            self.forward_local(packet, now)
        } else if src_local {
            self.forward_outbound(from, packet, now)
        } else if dst_local {
            self.forward_inbound_direct(packet)
        } else if packet.dst == self.config.external_address {
            self.forward_inbound_nat(packet, now)
        } else {
            self.forward_transit(packet)
        }
    }

    /// Run every maintenance sweep with the configured timeouts.
    pub fn run_sweeps(&mut self, now: u64) -> SweepReport {
        let report = SweepReport {
            leases: self.leases.sweep_expired(now, self.config.lease_timeout),
            nat: self.nat.sweep_expired(now, self.config.nat_timeout),
            seen: self.seen.sweep(now, self.config.seen_max_age),
        };
        if report.total() > 0 {
            debug!(
                leases = report.leases,
                nat = report.nat,
                seen = report.seen,
                "sweep removed expired state"
            );
        }
        report
    }

    fn handle_control(&mut self, from: &HardwareId, msg: ControlMessage, now: u64) -> Vec<Action> {
        match msg {
            ControlMessage::LeaseRequest => match self.leases.allocate(from, now) {
                Ok(address) => {
                    info!(%from, %address, "lease granted");
                    self.reply_control(from, address, ControlMessage::LeaseAck { address })
                }
                Err(error) => {
                    warn!(%from, %error, "lease refused");
                    self.reply_control(
                        from,
                        Addr::from_u32(0),
                        ControlMessage::LeaseNak {
                            reason: error.to_string(),
                        },
                    )
                }
            },
            ControlMessage::LeaseRelease => {
                if self.leases.release(from) {
                    info!(%from, "lease released");
                } else {
                    debug!(%from, "release for unknown lease ignored");
                }
                Vec::new()
            }
            ControlMessage::RegisterAck { assigned_address } => {
                info!(address = %assigned_address, "uplink registration acknowledged");
                self.uplink_registered = true;
                self.config.external_address = assigned_address;
                vec![Action::AssignedAddress {
                    address: assigned_address,
                }]
            }
            ControlMessage::RegisterNak { reason } => {
                warn!(%reason, "uplink registration refused");
                Vec::new()
            }
            other => {
                debug!(%from, ?other, "ignoring control message not addressed to a router");
                Vec::new()
            }
        }
    }

    /// local -> local: resolve the destination lease and deliver.
    fn forward_local(&mut self, mut packet: Packet, _now: u64) -> Vec<Action> {
        let Some(identity) = self.leases.resolve(packet.dst).cloned() else {
            debug!(dst = %packet.dst, "no lease for local destination");
            return self.error_toward(
                packet.src,
                ErrorKind::DestinationUnknown,
                "no lease for destination",
                Some(packet.dst.to_string()),
            );
        };
        if packet.decrement_ttl().is_err() {
            warn!(id = %packet.id, "ttl exhausted during local forward");
            return Vec::new();
        }
        self.deliver(identity, &packet)
    }

    /// local -> external: NAT datagram source pairs, masquerade the
    /// source address, and send uplink.
    fn forward_outbound(&mut self, from: &HardwareId, mut packet: Packet, now: u64) -> Vec<Action> {
        if !self.uplink_registered {
            warn!(id = %packet.id, "no uplink registration; dropping outbound frame");
            return Vec::new();
        }
        if let Payload::Data(datagram) = &mut packet.payload {
            let external_port =
                match self
                    .nat
                    .map_outbound(packet.src, datagram.src_port, from, now)
                {
                    Ok(port) => port,
                    Err(error) => {
                        warn!(src = %packet.src, %error, "dropping outbound frame");
                        return Vec::new();
                    }
                };
            datagram.original_src_port = Some(datagram.src_port);
            datagram.src_port = external_port;
        }
        // Private addresses never leave the subnet, whatever the payload.
        packet.src = self.config.external_address;
        if packet.decrement_ttl().is_err() {
            warn!(id = %packet.id, "ttl exhausted during outbound forward");
            return Vec::new();
        }
        self.send_uplink(&packet)
    }

    /// external -> local (not our external address): no translation.
    fn forward_inbound_direct(&mut self, mut packet: Packet) -> Vec<Action> {
        let Some(identity) = self.leases.resolve(packet.dst).cloned() else {
            debug!(dst = %packet.dst, "no lease for inbound destination");
            return self.error_toward(
                packet.src,
                ErrorKind::DestinationUnknown,
                "no lease for destination",
                Some(packet.dst.to_string()),
            );
        };
        if packet.decrement_ttl().is_err() {
            warn!(id = %packet.id, "ttl exhausted during inbound forward");
            return Vec::new();
        }
        self.deliver(identity, &packet)
    }

    /// external -> our external address: reverse NAT to the internal pair.
    fn forward_inbound_nat(&mut self, mut packet: Packet, now: u64) -> Vec<Action> {
        let Payload::Data(datagram) = &mut packet.payload else {
            debug!(id = %packet.id, "non-data frame addressed to external address");
            return Vec::new();
        };
        let external_port = datagram.dst_port;
        // Unsolicited inbound is normal; misses are silent.
        let Some((internal_addr, internal_port)) = self.nat.map_inbound(external_port, now) else {
            debug!(port = external_port, "no NAT mapping for inbound frame");
            return Vec::new();
        };
        let Some(identity) = self.nat.get(external_port).map(|e| e.identity.clone()) else {
            return Vec::new();
        };
        packet.dst = internal_addr;
        datagram.dst_port = internal_port;
        if packet.decrement_ttl().is_err() {
            warn!(id = %packet.id, "ttl exhausted during NAT inbound forward");
            return Vec::new();
        }
        self.deliver(identity, &packet)
    }

    /// Neither side is ours: forward toward the backbone unchanged.
    fn forward_transit(&mut self, mut packet: Packet) -> Vec<Action> {
        if !self.uplink_registered {
            warn!(id = %packet.id, "no uplink registration; dropping transit frame");
            return Vec::new();
        }
        if packet.decrement_ttl().is_err() {
            warn!(id = %packet.id, "ttl exhausted during transit forward");
            return Vec::new();
        }
        self.send_uplink(&packet)
    }

    /// Best-effort error packet toward an originator. Local originators
    /// get direct delivery; external ones go over the uplink when
    /// registered, otherwise the report is dropped.
    fn error_toward(
        &self,
        dst: Addr,
        kind: ErrorKind,
        message: &str,
        context: Option<String>,
    ) -> Vec<Action> {
        let packet = build_error_packet(self.config.external_address, dst, kind, message, context);
        if self.config.subnet.contains(dst) {
            match self.leases.resolve(dst).cloned() {
                Some(identity) => self.deliver(identity, &packet),
                None => Vec::new(),
            }
        } else if self.uplink_registered {
            self.send_uplink(&packet)
        } else {
            Vec::new()
        }
    }

    fn reply_control(&self, to: &HardwareId, dst: Addr, msg: ControlMessage) -> Vec<Action> {
        let packet = Packet::new(
            self.config.external_address,
            dst,
            Payload::Data(Datagram::control(msg)),
        );
        self.deliver(to.clone(), &packet)
    }

    fn deliver(&self, to: HardwareId, packet: &Packet) -> Vec<Action> {
        match codec::encode(packet) {
            Ok(raw) => vec![Action::Deliver { to, raw }],
            Err(error) => {
                warn!(%error, "failed to encode frame for delivery");
                Vec::new()
            }
        }
    }

    fn send_uplink(&self, packet: &Packet) -> Vec<Action> {
        match codec::encode(packet) {
            Ok(raw) => vec![Action::SendUplink { raw }],
            Err(error) => {
                warn!(%error, "failed to encode frame for uplink");
                Vec::new()
            }
        }
    }
}
