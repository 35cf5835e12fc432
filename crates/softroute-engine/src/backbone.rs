//! The backbone node's per-frame decision logic.
//!
//! [`BackboneEngine`] owns the route table, the downstream client
//! registrations, and a duplicate filter. Like the router engine it is
//! pure: frames in, [`Action`]s out. Route changes are surfaced as
//! [`Action::PersistRoute`] before any send action so the write-ahead
//! log always leads the wire.

use tracing::{debug, info, warn};

use softroute_core::codec::{self, build_error_packet};
use softroute_core::packet::{ControlMessage, Datagram, ErrorKind, Packet, Payload};
use softroute_core::types::{Addr, Cidr, HardwareId};

use crate::action::Action;
use crate::clients::ClientTable;
use crate::dedup::DuplicateFilter;
use crate::route::{ApplyOutcome, RouteTable};

/// Static configuration for one backbone node.
#[derive(Debug, Clone)]
pub struct BackboneConfig {
    /// The node's own address on the backbone.
    pub address: Addr,
    /// Subnets this node advertises and assigns client addresses from.
    pub subnets: Vec<Cidr>,
    /// Peer identities probed by keepalives.
    pub peers: Vec<HardwareId>,
    /// Route staleness bound in seconds.
    pub route_max_age: u64,
    /// Client registration idle timeout in seconds.
    pub client_timeout: u64,
    /// Duplicate filter capacity and age bound.
    pub seen_capacity: usize,
    pub seen_max_age: u64,
}

/// Counts removed by one maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackboneSweepReport {
    pub routes: usize,
    pub clients: usize,
    pub seen: usize,
}

impl BackboneSweepReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.routes + self.clients + self.seen
    }
}

/// The provider node: registers downstream routers, maintains the
/// path-vector table, and forwards between clients and peers.
#[must_use]
pub struct BackboneEngine {
    config: BackboneConfig,
    routes: RouteTable,
    clients: ClientTable,
    seen: DuplicateFilter,
    ping_seq: u64,
}

impl BackboneEngine {
    pub fn new(config: BackboneConfig) -> Self {
        let seen = DuplicateFilter::new(config.seen_capacity);
        Self {
            config,
            routes: RouteTable::new(),
            clients: ClientTable::new(),
            seen,
            ping_seq: 0,
        }
    }

    /// Restore an engine from a persisted route table.
    pub fn with_routes(config: BackboneConfig, routes: RouteTable) -> Self {
        let seen = DuplicateFilter::new(config.seen_capacity);
        Self {
            config,
            routes,
            clients: ClientTable::new(),
            seen,
            ping_seq: 0,
        }
    }

    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    #[must_use]
    pub fn clients(&self) -> &ClientTable {
        &self.clients
    }

    #[must_use]
    pub fn address(&self) -> Addr {
        self.config.address
    }

    /// Process one inbound frame into actions.
    pub fn handle_frame(&mut self, from: &HardwareId, raw: &[u8], now: u64) -> Vec<Action> {
        let packet = match codec::decode(raw) {
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

        // Any traffic from a registered client keeps its registration alive.
        self.clients.refresh(from, now);

        match &packet.payload {
            Payload::Route(update) => {
                let update = update.clone();
                match self.routes.apply(&update, now) {
                    ApplyOutcome::Applied => {
                        info!(
                            op = ?update.op,
                            prefix = %update.prefix,
                            origin = %update.origin,
                            sequence = update.sequence,
                            "route update applied"
                        );
                        vec![Action::PersistRoute(update)]
                    }
                    ApplyOutcome::Rejected(reason) => {
                        debug!(prefix = %update.prefix, ?reason, "route update rejected");
                        Vec::new()
                    }
                }
            }
            Payload::Ping { seq } => {
                debug!(%from, seq, "keepalive received");
                Vec::new()
            }
            _ => {
                if let Some(ControlMessage::RegisterHello { claimed_address }) = packet.control() {
                    return self.handle_register(from, *claimed_address, now);
                }
                self.forward(from, packet, now)
            }
        }
    }

    /// Time-based keepalive probes toward every configured peer.
    pub fn keepalive_actions(&mut self, now: u64) -> Vec<Action> {
        let mut actions = Vec::with_capacity(self.config.peers.len());
        for peer in &self.config.peers {
            self.ping_seq += 1;
            let ping = Packet::new(
                self.config.address,
                Addr::from_u32(0),
                Payload::Ping { seq: self.ping_seq },
            );
            // Our own probes must not be treated as duplicates if echoed.
            self.seen.touch(ping.id, now);
            match codec::encode(&ping) {
                Ok(raw) => actions.push(Action::Deliver {
                    to: peer.clone(),
                    raw,
                }),
                Err(error) => warn!(%peer, %error, "failed to encode keepalive"),
            }
        }
        actions
    }

    /// Run every maintenance sweep with the configured timeouts.
    pub fn run_sweeps(&mut self, now: u64) -> BackboneSweepReport {
        let report = BackboneSweepReport {
            routes: self.routes.sweep_stale(now, self.config.route_max_age),
            clients: self.clients.sweep_idle(now, self.config.client_timeout),
            seen: self.seen.sweep(now, self.config.seen_max_age),
        };
        if report.total() > 0 {
            debug!(
                routes = report.routes,
                clients = report.clients,
                seen = report.seen,
                "sweep removed expired state"
            );
        }
        report
    }

    fn in_subnets(&self, addr: Addr) -> bool {
        self.config.subnets.iter().any(|s| s.contains(addr))
    }

    fn handle_register(&mut self, from: &HardwareId, claimed: Addr, now: u64) -> Vec<Action> {
        if self.in_subnets(claimed) {
            info!(%from, address = %claimed, "client registered");
            self.clients.register(from.clone(), claimed, now);
            self.reply_control(
                from,
                claimed,
                ControlMessage::RegisterAck {
                    assigned_address: claimed,
                },
            )
        } else {
            warn!(%from, address = %claimed, "registration refused: address outside advertised subnets");
            self.reply_control(
                from,
                claimed,
                ControlMessage::RegisterNak {
                    reason: format!("{claimed} is outside the advertised subnets"),
                },
            )
        }
    }

    fn forward(&mut self, from: &HardwareId, mut packet: Packet, _now: u64) -> Vec<Action> {
        if packet.ttl == 0 {
            debug!(id = %packet.id, src = %packet.src, "frame arrived with exhausted ttl");
            return self.error_toward(
                packet.src,
                ErrorKind::TtlExpired,
                "ttl reached zero",
                Some(packet.dst.to_string()),
            );
        }

        // A registered client may only source in-subnet traffic from its
        // own registered address.
        if self.in_subnets(packet.src) && !self.clients.is_authorized(from, packet.src) {
            warn!(%from, src = %packet.src, "dropping frame with unauthorized source address");
            return Vec::new();
        }

        if self.in_subnets(packet.dst) {
            let Some(identity) = self.clients.resolve(packet.dst).cloned() else {
                debug!(dst = %packet.dst, "no registration for destination");
                return self.error_toward(
                    packet.src,
                    ErrorKind::DestinationUnknown,
                    "no registration for destination",
                    Some(packet.dst.to_string()),
                );
            };
            if packet.decrement_ttl().is_err() {
                warn!(id = %packet.id, "ttl exhausted during client delivery");
                return Vec::new();
            }
            return self.deliver(identity, &packet);
        }

        let Some(next_hop) = self.routes.lookup(packet.dst).map(|entry| entry.next_hop) else {
            debug!(dst = %packet.dst, "no route toward destination");
            return self.error_toward(
                packet.src,
                ErrorKind::Unreachable,
                "no route toward destination",
                Some(packet.dst.to_string()),
            );
        };
        if packet.decrement_ttl().is_err() {
            warn!(id = %packet.id, "ttl exhausted during transit forward");
            return Vec::new();
        }
        match self.clients.resolve(next_hop).cloned() {
            Some(identity) => self.deliver(identity, &packet),
            // Next hop has no registration here; flood and let the
            // duplicate filters downstream contain it.
            None => self.broadcast(&packet),
        }
    }

    /// Best-effort error packet toward an originator. Resolves like data
    /// traffic, but a failure to resolve is silent.
    fn error_toward(
        &self,
        dst: Addr,
        kind: ErrorKind,
        message: &str,
        context: Option<String>,
    ) -> Vec<Action> {
        let packet = build_error_packet(self.config.address, dst, kind, message, context);
        if self.in_subnets(dst) {
            match self.clients.resolve(dst).cloned() {
                Some(identity) => self.deliver(identity, &packet),
                None => Vec::new(),
            }
        } else {
            match self
                .routes
                .lookup(dst)
                .and_then(|entry| self.clients.resolve(entry.next_hop))
                .cloned()
            {
                Some(identity) => self.deliver(identity, &packet),
                None => Vec::new(),
            }
        }
    }

    fn reply_control(&self, to: &HardwareId, dst: Addr, msg: ControlMessage) -> Vec<Action> {
        let packet = Packet::new(
            self.config.address,
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

    fn broadcast(&self, packet: &Packet) -> Vec<Action> {
        match codec::encode(packet) {
            Ok(raw) => vec![Action::Broadcast { raw }],
            Err(error) => {
                warn!(%error, "failed to encode frame for broadcast");
                Vec::new()
            }
        }
    }
}
