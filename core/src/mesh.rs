//! The link facade: one engine, two roles, one contract.
//!
//! [`MeshLink`] owns the shared MTU cell and the per-peer reassembly
//! buffer, spawns both role sessions, and fans the driver's event stream
//! out to them. The application sees a single merged [`LinkEvent`] stream
//! with no role tagging: it neither knows nor cares whether a payload came
//! in over the initiator or responder side.

use crate::link::central::{CentralHandle, CentralSession};
use crate::link::config::LinkConfig;
use crate::link::metrics::{LinkMetrics, MetricsSnapshot};
use crate::link::mtu::SharedMtu;
use crate::link::peer::Peer;
use crate::link::peripheral::{PeripheralHandle, PeripheralSession};
use crate::link::reassembly::ReassemblyBuffer;
use crate::link::{LinkError, LinkEvent};
use crate::radio::driver::{RadioDriver, RadioEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Which role should carry an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferredRole {
    /// Write over the outbound (initiator) link.
    Initiator,
    /// Notify every peer connected to us (responder).
    Responder,
}

/// The application-facing link engine.
pub struct MeshLink {
    central: CentralHandle,
    peripheral: PeripheralHandle,
    mtu: SharedMtu,
    metrics: Arc<LinkMetrics>,
    router: JoinHandle<()>,
}

impl MeshLink {
    /// Wire the engine to a radio driver and its event stream.
    ///
    /// Returns the engine handle plus the merged event stream the
    /// application consumes.
    pub fn start(
        driver: Arc<dyn RadioDriver>,
        mut radio_events: mpsc::Receiver<RadioEvent>,
        config: LinkConfig,
    ) -> Result<(MeshLink, mpsc::Receiver<LinkEvent>), LinkError> {
        config.validate()?;

        let metrics = Arc::new(LinkMetrics::new());
        let mtu = SharedMtu::new();
        let reassembly = ReassemblyBuffer::new(metrics.clone());
        let (link_tx, link_rx) = mpsc::channel(config.channel_capacity);

        let (central, central_tx) = CentralSession::spawn(
            driver.clone(),
            mtu.clone(),
            reassembly.clone(),
            metrics.clone(),
            config.clone(),
            link_tx.clone(),
        );
        let (peripheral, peripheral_tx) = PeripheralSession::spawn(
            driver,
            mtu.clone(),
            reassembly,
            metrics.clone(),
            config,
            link_tx,
        );

        // Fan driver events out to the role each belongs to. MTU results
        // go to both: either role may have triggered the negotiation.
        let router = tokio::spawn(async move {
            while let Some(event) = radio_events.recv().await {
                let routed = match event {
                    RadioEvent::PeerDiscovered { .. }
                    | RadioEvent::CentralConnectionChanged { .. }
                    | RadioEvent::ServiceResolved { .. }
                    | RadioEvent::Notification { .. }
                    | RadioEvent::WriteAcked { .. } => central_tx.send(event).await,
                    RadioEvent::PeerConnected { .. }
                    | RadioEvent::PeerDisconnected { .. }
                    | RadioEvent::InboundWrite { .. } => peripheral_tx.send(event).await,
                    RadioEvent::MtuChanged { .. } => {
                        let for_peripheral = peripheral_tx.send(event.clone()).await;
                        central_tx.send(event).await.and(for_peripheral)
                    }
                };
                if routed.is_err() {
                    break;
                }
            }
            debug!("Radio event router stopped");
        });

        Ok((
            MeshLink {
                central,
                peripheral,
                mtu,
                metrics,
                router,
            },
            link_rx,
        ))
    }

    /// Begin discovery of mesh nodes (initiator role).
    pub async fn scan(&self) -> Result<(), LinkError> {
        self.central.scan().await
    }

    /// Connect to a discovered peer (initiator role).
    pub async fn connect(&self, peer: Peer) -> Result<(), LinkError> {
        self.central.connect(peer).await
    }

    /// Tear down the outbound link. Idempotent.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.central.disconnect().await
    }

    /// Expose the mesh service and accept connections (responder role).
    pub async fn start_advertising(&self) -> Result<(), LinkError> {
        self.peripheral.start_advertising().await
    }

    /// Stop advertising and drop every connected peer. Idempotent.
    pub async fn stop(&self) -> Result<(), LinkError> {
        self.peripheral.stop().await
    }

    /// Send an opaque payload over the preferred role.
    pub async fn send_message(
        &self,
        payload: Vec<u8>,
        role: PreferredRole,
    ) -> Result<(), LinkError> {
        match role {
            PreferredRole::Initiator => self.central.send(payload).await,
            PreferredRole::Responder => self.peripheral.broadcast(payload).await,
        }
    }

    /// Current negotiated MTU.
    pub fn mtu(&self) -> u16 {
        self.mtu.current()
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop routing driver events. Sessions wind down once their channels
    /// drain.
    pub fn shutdown(self) {
        self.router.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::config::FramePacing;
    use crate::radio::loopback::{LoopbackConfig, LoopbackRadio};

    fn node(addr: &str) -> (MeshLink, mpsc::Receiver<LinkEvent>, MeshLink, mpsc::Receiver<LinkEvent>) {
        let other = if addr == "node-a" { "node-b" } else { "node-a" };
        let ((radio_a, events_a), (radio_b, events_b)) = LoopbackRadio::pair(
            LoopbackConfig::new(addr),
            LoopbackConfig::new(other),
        );
        let config = LinkConfig::default().with_frame_pacing(FramePacing::None);
        let (link_a, rx_a) =
            MeshLink::start(Arc::new(radio_a), events_a, config.clone()).expect("start a");
        let (link_b, rx_b) = MeshLink::start(Arc::new(radio_b), events_b, config).expect("start b");
        (link_a, rx_a, link_b, rx_b)
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let ((radio, events), _other) = LoopbackRadio::pair(
            LoopbackConfig::new("node-a"),
            LoopbackConfig::new("node-b"),
        );
        let config = LinkConfig::default().with_channel_capacity(0);
        let result = MeshLink::start(Arc::new(radio), events, config);
        assert!(matches!(result, Err(LinkError::Config(_))));
    }

    #[tokio::test]
    async fn test_default_mtu_before_negotiation() {
        let (link_a, _rx_a, _link_b, _rx_b) = node("node-a");
        assert_eq!(link_a.mtu(), crate::link::mtu::MIN_MTU);
    }
}
