//! Responder session: the side that advertises and accepts connections.
//!
//! Advertising runs independently of any individual peer; the session
//! serves many connected initiators at once. Inbound writes feed the
//! shared reassembly buffer per peer; outbound payloads go out as
//! notifications to every connected peer.

use crate::link::config::LinkConfig;
use crate::link::frame;
use crate::link::metrics::LinkMetrics;
use crate::link::mtu::SharedMtu;
use crate::link::peer::{ConnectionState, Peer, PeerAddr};
use crate::link::reassembly::ReassemblyBuffer;
use crate::link::{LinkError, LinkEvent};
use crate::radio::driver::{AdvertiseConfig, RadioDriver, RadioEvent};
use crate::radio::MESH_SERVICE_UUID;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug)]
enum PeripheralCommand {
    StartAdvertising {
        reply: mpsc::Sender<Result<(), LinkError>>,
    },
    Broadcast {
        payload: Vec<u8>,
        reply: mpsc::Sender<Result<(), LinkError>>,
    },
    Stop {
        reply: mpsc::Sender<Result<(), LinkError>>,
    },
}

/// Handle to a running responder session.
#[derive(Clone)]
pub struct PeripheralHandle {
    command_tx: mpsc::Sender<PeripheralCommand>,
}

impl PeripheralHandle {
    async fn request(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<(), LinkError>>) -> PeripheralCommand,
    ) -> Result<(), LinkError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| LinkError::SessionClosed)?;
        reply_rx.recv().await.ok_or(LinkError::SessionClosed)?
    }

    /// Expose the mesh service and accept connections. Idempotent.
    pub async fn start_advertising(&self) -> Result<(), LinkError> {
        self.request(|reply| PeripheralCommand::StartAdvertising { reply })
            .await
    }

    /// Send a payload to every connected peer.
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        self.request(|reply| PeripheralCommand::Broadcast { payload, reply })
            .await
    }

    /// Stop advertising and drop all connected peers. Idempotent.
    pub async fn stop(&self) -> Result<(), LinkError> {
        self.request(|reply| PeripheralCommand::Stop { reply }).await
    }
}

/// The responder session task.
pub struct PeripheralSession {
    driver: Arc<dyn RadioDriver>,
    mtu: SharedMtu,
    reassembly: ReassemblyBuffer,
    metrics: Arc<LinkMetrics>,
    config: LinkConfig,
    link_tx: mpsc::Sender<LinkEvent>,
    advertising: bool,
    peers: HashMap<PeerAddr, Peer>,
    broadcast_tasks: Vec<JoinHandle<()>>,
}

impl PeripheralSession {
    /// Spawn the session task. Returns the command handle and the sender
    /// the facade routes responder-side radio events into.
    pub fn spawn(
        driver: Arc<dyn RadioDriver>,
        mtu: SharedMtu,
        reassembly: ReassemblyBuffer,
        metrics: Arc<LinkMetrics>,
        config: LinkConfig,
        link_tx: mpsc::Sender<LinkEvent>,
    ) -> (PeripheralHandle, mpsc::Sender<RadioEvent>) {
        let (command_tx, mut command_rx) = mpsc::channel(config.channel_capacity);
        let (event_tx, mut event_rx) = mpsc::channel(config.channel_capacity);

        let mut session = PeripheralSession {
            driver,
            mtu,
            reassembly,
            metrics,
            config,
            link_tx,
            advertising: false,
            peers: HashMap::new(),
            broadcast_tasks: Vec::new(),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    command = command_rx.recv() => match command {
                        Some(command) => session.handle_command(command).await,
                        None => break,
                    },
                    event = event_rx.recv() => match event {
                        Some(event) => session.handle_event(event).await,
                        None => break,
                    },
                }
            }
            session.abort_broadcasts();
            debug!("Peripheral session stopped");
        });

        (PeripheralHandle { command_tx }, event_tx)
    }

    async fn handle_command(&mut self, command: PeripheralCommand) {
        match command {
            PeripheralCommand::StartAdvertising { reply } => {
                let result = self.start_advertising().await;
                let _ = reply.send(result).await;
            }
            PeripheralCommand::Broadcast { payload, reply } => {
                let result = self.broadcast(payload);
                let _ = reply.send(result).await;
            }
            PeripheralCommand::Stop { reply } => {
                self.stop_all().await;
                let _ = reply.send(Ok(())).await;
            }
        }
    }

    async fn start_advertising(&mut self) -> Result<(), LinkError> {
        if self.advertising {
            return Ok(());
        }
        let caps = self.driver.capabilities();
        if !caps.can_advertise || !caps.can_accept_connections {
            // Permanent condition: surfaced once in the log, never retried.
            error!("Radio cannot advertise or accept connections; responder role unavailable");
            return Ok(());
        }
        self.driver
            .start_advertising(AdvertiseConfig {
                service: MESH_SERVICE_UUID,
                local_name: None,
            })
            .await?;
        self.advertising = true;
        info!("Advertising started");
        Ok(())
    }

    fn broadcast(&mut self, payload: Vec<u8>) -> Result<(), LinkError> {
        if self.peers.is_empty() {
            debug!("Broadcast with no connected peers; nothing to do");
            return Ok(());
        }
        let mtu = self.mtu.current();
        let frames = frame::fragment(&payload, mtu).map_err(|err| {
            error!(mtu, error = %err, "Cannot fragment payload; broadcast aborted");
            LinkError::Frame(err)
        })?;
        let targets: Vec<PeerAddr> = self.peers.keys().cloned().collect();
        debug!(
            len = payload.len(),
            frames = frames.len(),
            peers = targets.len(),
            "Broadcasting fragmented payload"
        );
        LinkMetrics::incr(&self.metrics.messages_sent);
        self.spawn_broadcast(targets, frames);
        Ok(())
    }

    /// Notify every peer, frame by frame, on a child task so `stop` can
    /// abandon the remainder. A failure toward one peer never aborts the
    /// others.
    fn spawn_broadcast(&mut self, targets: Vec<PeerAddr>, frames: Vec<Vec<u8>>) {
        let driver = self.driver.clone();
        let metrics = self.metrics.clone();
        let pacing = self.config.frame_pacing;
        let handle = tokio::spawn(async move {
            for frame in &frames {
                for peer in &targets {
                    if let Err(err) = driver.notify(peer, frame).await {
                        LinkMetrics::incr(&metrics.write_failures);
                        warn!(peer = %peer, error = %err, "Notify failed; continuing with others");
                    }
                }
                if let Some(delay) = pacing.delay() {
                    tokio::time::sleep(delay).await;
                }
            }
        });
        self.broadcast_tasks.retain(|task| !task.is_finished());
        self.broadcast_tasks.push(handle);
    }

    fn abort_broadcasts(&mut self) {
        for task in self.broadcast_tasks.drain(..) {
            task.abort();
        }
    }

    async fn stop_all(&mut self) {
        self.abort_broadcasts();
        if self.advertising {
            if let Err(err) = self.driver.stop_advertising().await {
                warn!(error = %err, "stop_advertising failed");
            }
            self.advertising = false;
        }
        let peers: Vec<PeerAddr> = self.peers.drain().map(|(addr, _)| addr).collect();
        for peer in peers {
            if let Err(err) = self.driver.disconnect(&peer).await {
                warn!(peer = %peer, error = %err, "Force disconnect failed");
            }
            self.reassembly.drop_peer(&peer);
            self.emit_state(peer, ConnectionState::Disconnected).await;
        }
        info!("Peripheral stopped");
    }

    async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PeerConnected { mut peer } => {
                info!(peer = %peer.addr, "Peer connected");
                peer.state = ConnectionState::Connected;
                let addr = peer.addr.clone();
                self.peers.insert(addr.clone(), peer);
                self.emit_state(addr, ConnectionState::Connected).await;
            }
            RadioEvent::PeerDisconnected { peer } => {
                if self.peers.remove(&peer).is_some() {
                    info!(peer = %peer, "Peer disconnected");
                    self.reassembly.drop_peer(&peer);
                    self.emit_state(peer, ConnectionState::Disconnected).await;
                }
            }
            RadioEvent::InboundWrite {
                peer,
                frame,
                response_needed,
            } => {
                if !self.peers.contains_key(&peer) {
                    // No buffering for peers that already disconnected.
                    debug!(peer = %peer, "Dropping write from unknown peer");
                    return;
                }
                if let Some(payload) = self.reassembly.add_fragment(&peer, &frame) {
                    let _ = self.link_tx.send(LinkEvent::PayloadReceived(payload)).await;
                }
                if response_needed {
                    // No-op acknowledgement; this protocol carries no
                    // status codes of its own.
                    if let Err(err) = self.driver.acknowledge_write(&peer).await {
                        warn!(peer = %peer, error = %err, "Write acknowledgement failed");
                    }
                }
            }
            RadioEvent::MtuChanged { peer, mtu } => {
                // Most recent negotiation wins for all peers; see SharedMtu.
                debug!(peer = %peer, mtu, "Peer negotiated MTU");
                self.mtu.on_negotiated(mtu);
            }
            other => {
                trace!(event = ?other, "Ignoring initiator-side event in peripheral session");
            }
        }
    }

    async fn emit_state(&self, peer: PeerAddr, state: ConnectionState) {
        let _ = self
            .link_tx
            .send(LinkEvent::ConnectionStateChanged { peer, state })
            .await;
    }
}
