//! In-memory broadcast link layer.
//!
//! A [`Wire`] models one unreliable broadcast segment: every attached
//! identity gets a mailbox, frames are fire-and-forget, and a full or
//! detached mailbox silently loses the frame. Nodes and tests share
//! this transport.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use softroute_core::types::HardwareId;

/// Mailbox depth per attached identity.
const MAILBOX_DEPTH: usize = 1024;

/// One received frame with its sender's link-layer identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub from: HardwareId,
    pub raw: Vec<u8>,
}

/// A shared broadcast segment.
#[derive(Clone, Default)]
pub struct Wire {
    stations: Arc<Mutex<HashMap<HardwareId, mpsc::Sender<LinkEvent>>>>,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an identity to the segment, replacing any previous
    /// attachment under the same identity.
    pub async fn attach(&self, identity: HardwareId) -> Link {
        let (tx, rx) = mpsc::channel(MAILBOX_DEPTH);
        self.stations.lock().await.insert(identity.clone(), tx);
        Link {
            identity,
            wire: self.clone(),
            rx,
        }
    }
}

/// One attachment to a [`Wire`].
pub struct Link {
    identity: HardwareId,
    wire: Wire,
    rx: mpsc::Receiver<LinkEvent>,
}

impl Link {
    #[must_use]
    pub fn identity(&self) -> &HardwareId {
        &self.identity
    }

    /// Send a frame to one identity. Fire and forget: an unknown or
    /// saturated receiver loses the frame.
    pub async fn send(&self, to: &HardwareId, raw: Vec<u8>) {
        let stations = self.wire.stations.lock().await;
        match stations.get(to) {
            Some(tx) => {
                if tx.try_send(LinkEvent {
                    from: self.identity.clone(),
                    raw,
                })
                .is_err()
                {
                    debug!(%to, "frame lost: mailbox full or detached");
                }
            }
            None => debug!(%to, "frame lost: no such station"),
        }
    }

    /// Broadcast a frame to every other attached identity.
    pub async fn broadcast(&self, raw: Vec<u8>) {
        let stations = self.wire.stations.lock().await;
        for (identity, tx) in stations.iter() {
            if *identity == self.identity {
                continue;
            }
            if tx
                .try_send(LinkEvent {
                    from: self.identity.clone(),
                    raw: raw.clone(),
                })
                .is_err()
            {
                debug!(to = %identity, "broadcast frame lost");
            }
        }
    }

    /// Receive the next frame. Returns `None` if the attachment was
    /// replaced on the wire.
    pub async fn recv(&mut self) -> Option<LinkEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw(name: &str) -> HardwareId {
        HardwareId::new(name)
    }

    #[tokio::test]
    async fn test_send_reaches_target_only() {
        let wire = Wire::new();
        let a = wire.attach(hw("a")).await;
        let mut b = wire.attach(hw("b")).await;
        let mut c = wire.attach(hw("c")).await;

        a.send(&hw("b"), vec![1, 2, 3]).await;

        let event = b.recv().await.unwrap();
        assert_eq!(event.from, hw("a"));
        assert_eq!(event.raw, vec![1, 2, 3]);

        a.send(&hw("c"), vec![9]).await;
        assert_eq!(c.recv().await.unwrap().raw, vec![9]);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let wire = Wire::new();
        let a = wire.attach(hw("a")).await;
        let mut b = wire.attach(hw("b")).await;
        let mut c = wire.attach(hw("c")).await;

        a.broadcast(vec![7]).await;
        assert_eq!(b.recv().await.unwrap().raw, vec![7]);
        assert_eq!(c.recv().await.unwrap().raw, vec![7]);

        // The sender's own mailbox stays empty.
        a.send(&hw("b"), vec![0]).await;
        assert_eq!(b.recv().await.unwrap().raw, vec![0]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_station_is_silent() {
        let wire = Wire::new();
        let a = wire.attach(hw("a")).await;
        a.send(&hw("ghost"), vec![1]).await;
    }
}
