//! The node runtime: one event loop around one engine.
//!
//! The engine decides, the node performs. Inbound frames come off the
//! link, pass through the engine, and the resulting actions are carried
//! out in order. Interval ticks drive sweeps, keepalives, and state
//! persistence; sweeps additionally fire after a burst of frames so
//! heavy traffic cannot starve maintenance.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use softroute_core::packet::RouteUpdate;
use softroute_core::types::HardwareId;
use softroute_engine::{Action, BackboneEngine, RouterEngine};

use crate::config::{self, NodeConfig, NodeMode};
use crate::error::NodeError;
use crate::link::{Link, LinkEvent};
use crate::storage::Storage;

/// Frames processed between forced maintenance sweeps.
const FRAMES_PER_SWEEP: u32 = 64;

/// Monotonic-enough seconds for table timestamps. Wall clock, so
/// persisted state ages correctly across restarts.
fn clock_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

enum Engine {
    Router(RouterEngine),
    Backbone(BackboneEngine),
}

/// Handle for signaling shutdown from another task.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// A running softroute node in either mode.
pub struct Node {
    config: NodeConfig,
    /// Where the config came from; assigned-address writeback target.
    config_path: Option<PathBuf>,
    engine: Engine,
    link: Link,
    uplink: HardwareId,
    storage: Option<Storage>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    frames_since_sweep: u32,
    wal_appends: u64,
    started: bool,
}

impl Node {
    /// Build a node from configuration and an attached link.
    pub fn new(
        config: NodeConfig,
        config_path: Option<PathBuf>,
        link: Link,
    ) -> Result<Self, NodeError> {
        let engine = match config.node.mode {
            NodeMode::Router => Engine::Router(RouterEngine::new(config.router_config()?)),
            NodeMode::Backbone => Engine::Backbone(BackboneEngine::new(config.backbone_config()?)),
        };

        let storage = if config.node.enable_storage {
            match &config.node.storage_path {
                Some(path) => match Storage::new(PathBuf::from(path)) {
                    Ok(storage) => Some(storage),
                    Err(e) => {
                        warn!("failed to initialize storage: {e}");
                        None
                    }
                },
                None => {
                    debug!("storage enabled but no storage_path configured");
                    None
                }
            }
        } else {
            None
        };

        let uplink = HardwareId::new(config.router.uplink.as_str());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            config_path,
            engine,
            link,
            uplink,
            storage,
            shutdown_tx,
            shutdown_rx,
            frames_since_sweep: 0,
            wal_appends: 0,
            started: false,
        })
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Load persisted state and announce ourselves on the uplink.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.started {
            return Err(NodeError::AlreadyRunning);
        }
        self.started = true;

        if self.storage.is_some() {
            self.restore_state().await?;
        }

        if let Engine::Router(engine) = &self.engine {
            let actions = engine.hello_uplink();
            self.perform(actions).await;
        }
        Ok(())
    }

    async fn restore_state(&mut self) -> Result<(), NodeError> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let now = clock_now();
        match self.config.node.mode {
            NodeMode::Router => {
                let rc = self.config.router_config()?;
                let leases = storage
                    .load_leases(rc.pool_first, rc.pool_last, rc.lease_timeout)
                    .await?;
                let nat = storage.load_nat(rc.nat_range.0, rc.nat_range.1).await?;
                info!(leases = leases.len(), nat = nat.len(), "restored router state");
                self.engine = Engine::Router(RouterEngine::with_state(rc, leases, nat));
            }
            NodeMode::Backbone => {
                let bc = self.config.backbone_config()?;
                let routes = storage.load_routes(now).await?;
                info!(routes = routes.len(), "restored backbone state");
                self.engine = Engine::Backbone(BackboneEngine::with_routes(bc, routes));
            }
        }
        Ok(())
    }

    /// Run the event loop until shutdown or link detach.
    pub async fn run(&mut self) {
        let mut sweep_interval =
            tokio::time::interval(Duration::from_secs(self.config.node.sweep_interval.max(1)));
        let mut keepalive_interval = tokio::time::interval(Duration::from_secs(
            self.config.backbone.keepalive_interval.max(1),
        ));
        let keepalive_enabled = matches!(self.engine, Engine::Backbone(_));

        let persist_secs = self.config.node.persist_interval;
        let persist_enabled = persist_secs > 0 && self.storage.is_some();
        let mut persist_interval =
            tokio::time::interval(Duration::from_secs(if persist_enabled {
                persist_secs
            } else {
                3600
            }));

        // Don't fire immediately
        sweep_interval.tick().await;
        keepalive_interval.tick().await;
        persist_interval.tick().await;

        info!("entering event loop");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                biased;

                event = self.link.recv() => {
                    match event {
                        Some(event) => self.process_frame(event).await,
                        None => {
                            info!("link detached, exiting");
                            break;
                        }
                    }
                }

                _ = sweep_interval.tick() => {
                    self.run_sweeps();
                }

                _ = keepalive_interval.tick(), if keepalive_enabled => {
                    self.send_keepalives().await;
                }

                _ = persist_interval.tick(), if persist_enabled => {
                    self.persist_state().await;
                }

                _ = shutdown_rx.changed() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }
    }

    /// Signal the node to shut down.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Persist final state and tear down.
    pub async fn shutdown(mut self) {
        info!("shutting down node");
        self.trigger_shutdown();
        self.persist_state().await;
        info!("node shutdown complete");
    }

    async fn process_frame(&mut self, event: LinkEvent) {
        let now = clock_now();
        let actions = match &mut self.engine {
            Engine::Router(engine) => engine.handle_frame(&event.from, &event.raw, now),
            Engine::Backbone(engine) => engine.handle_frame(&event.from, &event.raw, now),
        };
        self.perform(actions).await;

        self.frames_since_sweep += 1;
        if self.frames_since_sweep >= FRAMES_PER_SWEEP {
            self.run_sweeps();
        }
    }

    async fn perform(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Deliver { to, raw } => self.link.send(&to, raw).await,
                Action::SendUplink { raw } => {
                    let uplink = self.uplink.clone();
                    self.link.send(&uplink, raw).await;
                }
                Action::Broadcast { raw } => self.link.broadcast(raw).await,
                Action::AssignedAddress { address } => match &self.config_path {
                    Some(path) => {
                        if let Err(e) = config::store_assigned_address(path, address) {
                            warn!("failed to store assigned address: {e}");
                        }
                    }
                    None => debug!(%address, "no config path; assigned address not persisted"),
                },
                Action::PersistRoute(update) => self.persist_route(&update).await,
            }
        }
    }

    async fn persist_route(&mut self, update: &RouteUpdate) {
        let appended = match &self.storage {
            Some(storage) => match storage.append_route_wal(update).await {
                Ok(()) => true,
                Err(e) => {
                    warn!("failed to append route WAL: {e}");
                    false
                }
            },
            None => false,
        };
        if !appended {
            return;
        }

        self.wal_appends += 1;
        let every = self.config.backbone.wal_snapshot_every;
        if every > 0 && self.wal_appends >= every {
            let compacted = match (&self.storage, &self.engine) {
                (Some(storage), Engine::Backbone(engine)) => {
                    match storage.snapshot_routes(engine.routes()).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("failed to snapshot route table: {e}");
                            false
                        }
                    }
                }
                _ => false,
            };
            if compacted {
                self.wal_appends = 0;
            }
        }
    }

    fn run_sweeps(&mut self) {
        let now = clock_now();
        self.frames_since_sweep = 0;
        match &mut self.engine {
            Engine::Router(engine) => {
                engine.run_sweeps(now);
            }
            Engine::Backbone(engine) => {
                engine.run_sweeps(now);
            }
        }
    }

    async fn send_keepalives(&mut self) {
        let now = clock_now();
        let actions = match &mut self.engine {
            Engine::Backbone(engine) => engine.keepalive_actions(now),
            Engine::Router(_) => Vec::new(),
        };
        self.perform(actions).await;
    }

    async fn persist_state(&mut self) {
        match (&self.storage, &self.engine) {
            (Some(storage), Engine::Router(engine)) => {
                if let Err(e) = storage.save_leases(engine.leases()).await {
                    warn!("failed to persist leases: {e}");
                }
                if let Err(e) = storage.save_nat(engine.nat()).await {
                    warn!("failed to persist NAT table: {e}");
                }
            }
            (Some(storage), Engine::Backbone(engine)) => {
                if let Err(e) = storage.snapshot_routes(engine.routes()).await {
                    warn!("failed to persist route table: {e}");
                } else {
                    self.wal_appends = 0;
                }
            }
            (None, _) => {}
        }
    }
}
