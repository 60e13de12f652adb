//! Initiator session: the side that discovers and connects outward.
//!
//! The session runs as a task owning its state machine; a cloneable
//! [`CentralHandle`] sends commands in over a channel and radio events
//! arrive on a second channel. Nothing here blocks the caller.
//!
//! Lifecycle: `Idle -> Scanning -> Connecting -> NegotiatingMtu ->
//! ServiceReady -> Disconnecting -> Idle`. At most one outbound peer at a
//! time; MTU request and service resolution are issued together on
//! connect, as the radio stack handles them independently.

use crate::link::config::{LinkConfig, ScanPolicy};
use crate::link::frame;
use crate::link::metrics::LinkMetrics;
use crate::link::mtu::SharedMtu;
use crate::link::peer::{ConnectionState, Peer, PeerAddr};
use crate::link::reassembly::ReassemblyBuffer;
use crate::link::{LinkError, LinkEvent};
use crate::radio::driver::{RadioDriver, RadioError, RadioEvent, ScanFilter};
use crate::radio::MESH_SERVICE_UUID;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Commands accepted by the session task.
#[derive(Debug)]
enum CentralCommand {
    Scan {
        reply: mpsc::Sender<Result<(), LinkError>>,
    },
    Connect {
        peer: Peer,
        reply: mpsc::Sender<Result<(), LinkError>>,
    },
    Send {
        payload: Vec<u8>,
        reply: mpsc::Sender<Result<(), LinkError>>,
    },
    Disconnect {
        reply: mpsc::Sender<Result<(), LinkError>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CentralState {
    Idle,
    Scanning,
    Connecting,
    NegotiatingMtu,
    ServiceReady,
    Disconnecting,
}

/// Handle to a running initiator session.
#[derive(Clone)]
pub struct CentralHandle {
    command_tx: mpsc::Sender<CentralCommand>,
}

impl CentralHandle {
    async fn request(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<(), LinkError>>) -> CentralCommand,
    ) -> Result<(), LinkError> {
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        self.command_tx
            .send(build(reply_tx))
            .await
            .map_err(|_| LinkError::SessionClosed)?;
        reply_rx.recv().await.ok_or(LinkError::SessionClosed)?
    }

    /// Begin discovery of mesh nodes.
    pub async fn scan(&self) -> Result<(), LinkError> {
        self.request(|reply| CentralCommand::Scan { reply }).await
    }

    /// Connect to a discovered peer.
    pub async fn connect(&self, peer: Peer) -> Result<(), LinkError> {
        self.request(|reply| CentralCommand::Connect { peer, reply })
            .await
    }

    /// Send a payload over the established link.
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        self.request(|reply| CentralCommand::Send { payload, reply })
            .await
    }

    /// Tear the link down. Idempotent.
    pub async fn disconnect(&self) -> Result<(), LinkError> {
        self.request(|reply| CentralCommand::Disconnect { reply })
            .await
    }
}

/// The initiator session task.
pub struct CentralSession {
    driver: Arc<dyn RadioDriver>,
    mtu: SharedMtu,
    reassembly: ReassemblyBuffer,
    metrics: Arc<LinkMetrics>,
    config: LinkConfig,
    link_tx: mpsc::Sender<LinkEvent>,
    state: CentralState,
    target: Option<Peer>,
    send_tasks: Vec<JoinHandle<()>>,
}

impl CentralSession {
    /// Spawn the session task. Returns the command handle and the sender
    /// the facade routes initiator-side radio events into.
    pub fn spawn(
        driver: Arc<dyn RadioDriver>,
        mtu: SharedMtu,
        reassembly: ReassemblyBuffer,
        metrics: Arc<LinkMetrics>,
        config: LinkConfig,
        link_tx: mpsc::Sender<LinkEvent>,
    ) -> (CentralHandle, mpsc::Sender<RadioEvent>) {
        let (command_tx, mut command_rx) = mpsc::channel(config.channel_capacity);
        let (event_tx, mut event_rx) = mpsc::channel(config.channel_capacity);

        let mut session = CentralSession {
            driver,
            mtu,
            reassembly,
            metrics,
            config,
            link_tx,
            state: CentralState::Idle,
            target: None,
            send_tasks: Vec::new(),
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
            session.abort_sends();
            debug!("Central session stopped");
        });

        (CentralHandle { command_tx }, event_tx)
    }

    async fn handle_command(&mut self, command: CentralCommand) {
        match command {
            CentralCommand::Scan { reply } => {
                let result = self.start_scan().await;
                let _ = reply.send(result).await;
            }
            CentralCommand::Connect { peer, reply } => {
                let result = self.begin_connect(peer).await;
                let _ = reply.send(result).await;
            }
            CentralCommand::Send { payload, reply } => {
                let result = self.send_payload(payload);
                let _ = reply.send(result).await;
            }
            CentralCommand::Disconnect { reply } => {
                self.disconnect_current().await;
                let _ = reply.send(Ok(())).await;
            }
        }
    }

    async fn start_scan(&mut self) -> Result<(), LinkError> {
        if !self.driver.capabilities().can_scan {
            // Permanent condition: surfaced once in the log, never retried.
            error!("Radio cannot scan; discovery unavailable");
            return Ok(());
        }
        match self.state {
            CentralState::Idle => {}
            CentralState::Scanning => return Ok(()),
            _ => return Err(LinkError::AlreadyConnected),
        }
        self.driver
            .start_scan(ScanFilter {
                service: MESH_SERVICE_UUID,
            })
            .await?;
        self.state = CentralState::Scanning;
        info!("Central scanning started");
        Ok(())
    }

    async fn begin_connect(&mut self, peer: Peer) -> Result<(), LinkError> {
        match self.state {
            CentralState::Idle | CentralState::Scanning => {}
            _ => return Err(LinkError::AlreadyConnected),
        }
        self.driver.connect(&peer.addr).await?;
        // The session owns the target's state machine from here on.
        let mut peer = peer;
        peer.state = ConnectionState::Connecting;
        let addr = peer.addr.clone();
        self.target = Some(peer);
        self.state = CentralState::Connecting;
        self.emit_state(addr, ConnectionState::Connecting).await;
        Ok(())
    }

    fn send_payload(&mut self, payload: Vec<u8>) -> Result<(), LinkError> {
        if self.state != CentralState::ServiceReady {
            return Err(LinkError::NotReady);
        }
        let peer = match &self.target {
            Some(peer) => peer.addr.clone(),
            None => return Err(LinkError::NotReady),
        };
        let mtu = self.mtu.current();
        let frames = frame::fragment(&payload, mtu).map_err(|err| {
            error!(mtu, error = %err, "Cannot fragment payload; send aborted");
            LinkError::Frame(err)
        })?;
        debug!(
            peer = %peer,
            len = payload.len(),
            frames = frames.len(),
            mtu,
            "Sending fragmented payload"
        );
        LinkMetrics::incr(&self.metrics.messages_sent);
        self.spawn_send(peer, frames);
        Ok(())
    }

    /// Write frames on a child task so disconnect can abandon them.
    fn spawn_send(&mut self, peer: PeerAddr, frames: Vec<Vec<u8>>) {
        let driver = self.driver.clone();
        let metrics = self.metrics.clone();
        let pacing = self.config.frame_pacing;
        let handle = tokio::spawn(async move {
            for frame in frames {
                // Best effort: a failed frame is logged and the rest of the
                // message still goes out.
                if let Err(err) = driver.write(&peer, &frame).await {
                    LinkMetrics::incr(&metrics.write_failures);
                    warn!(peer = %peer, error = %err, "Frame write failed; continuing");
                }
                if let Some(delay) = pacing.delay() {
                    tokio::time::sleep(delay).await;
                }
            }
        });
        self.send_tasks.retain(|task| !task.is_finished());
        self.send_tasks.push(handle);
    }

    fn abort_sends(&mut self) {
        for task in self.send_tasks.drain(..) {
            task.abort();
        }
    }

    async fn disconnect_current(&mut self) {
        self.abort_sends();
        if self.state == CentralState::Scanning {
            if let Err(err) = self.driver.stop_scan().await {
                warn!(error = %err, "stop_scan failed");
            }
        }
        if let Some(peer) = self.target.take() {
            self.state = CentralState::Disconnecting;
            self.emit_state(peer.addr.clone(), ConnectionState::Disconnecting)
                .await;
            if let Err(err) = self.driver.disconnect(&peer.addr).await {
                warn!(peer = %peer.addr, error = %err, "Driver disconnect failed");
            }
            self.reassembly.drop_peer(&peer.addr);
            self.emit_state(peer.addr, ConnectionState::Disconnected).await;
        }
        self.state = CentralState::Idle;
    }

    async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PeerDiscovered { peer } => {
                info!(peer = %peer.addr, name = ?peer.name, rssi = ?peer.rssi, "Peer discovered");
                let _ = self.link_tx.send(LinkEvent::PeerDiscovered(peer.clone())).await;
                if self.state == CentralState::Scanning
                    && self.config.scan_policy == ScanPolicy::ConnectFirstMatch
                {
                    if let Err(err) = self.driver.stop_scan().await {
                        warn!(error = %err, "stop_scan failed");
                    }
                    self.state = CentralState::Idle;
                    if let Err(err) = self.begin_connect(peer).await {
                        warn!(error = %err, "Auto-connect to discovered peer failed");
                    }
                }
            }
            RadioEvent::CentralConnectionChanged { peer, state } => {
                self.on_connection_changed(peer, state).await;
            }
            RadioEvent::MtuChanged { peer: _, mtu } => {
                self.mtu.on_negotiated(mtu);
            }
            RadioEvent::ServiceResolved { peer } => {
                if !self.is_target(&peer) {
                    return;
                }
                match self.driver.subscribe(&peer).await {
                    Ok(()) => {
                        self.state = CentralState::ServiceReady;
                        info!(peer = %peer, "Mesh service ready");
                    }
                    Err(err) => {
                        warn!(peer = %peer, error = %err, "Subscribe failed; tearing down");
                        self.disconnect_current().await;
                    }
                }
            }
            RadioEvent::Notification { peer, frame } => {
                if !self.is_target(&peer) {
                    // No buffering for links that already went down.
                    debug!(peer = %peer, "Dropping notification from non-target peer");
                    return;
                }
                if let Some(payload) = self.reassembly.add_fragment(&peer, &frame) {
                    let _ = self.link_tx.send(LinkEvent::PayloadReceived(payload)).await;
                }
            }
            RadioEvent::WriteAcked { peer } => {
                trace!(peer = %peer, "Write acknowledged");
            }
            other => {
                trace!(event = ?other, "Ignoring responder-side event in central session");
            }
        }
    }

    async fn on_connection_changed(&mut self, peer: PeerAddr, state: ConnectionState) {
        if !self.is_target(&peer) {
            return;
        }
        match state {
            ConnectionState::Connected => {
                if self.state != CentralState::Connecting {
                    return;
                }
                if let Some(target) = &mut self.target {
                    if let Err(err) = target.transition(ConnectionState::Connected) {
                        warn!(error = %err, "Ignoring radio state change");
                        return;
                    }
                }
                self.state = CentralState::NegotiatingMtu;
                self.emit_state(peer.clone(), ConnectionState::Connected).await;
                // The radio stack runs MTU negotiation and service
                // discovery independently; issue both right away.
                if let Err(err) = self
                    .mtu
                    .request_negotiation(self.driver.as_ref(), &peer, self.config.mtu_request)
                    .await
                {
                    warn!(peer = %peer, error = %err, "MTU request failed");
                }
                if let Err(err) = self.driver.resolve_service(&peer).await {
                    warn!(peer = %peer, error = %err, "Service resolution failed; tearing down");
                    self.disconnect_current().await;
                }
            }
            ConnectionState::Disconnected => {
                // Peer-initiated drop or terminal radio error.
                self.abort_sends();
                self.target = None;
                self.state = CentralState::Idle;
                self.reassembly.drop_peer(&peer);
                self.emit_state(peer, ConnectionState::Disconnected).await;
            }
            other => {
                self.emit_state(peer, other).await;
            }
        }
    }

    fn is_target(&self, peer: &PeerAddr) -> bool {
        self.target.as_ref().map(|t| &t.addr == peer).unwrap_or(false)
    }

    async fn emit_state(&self, peer: PeerAddr, state: ConnectionState) {
        let _ = self
            .link_tx
            .send(LinkEvent::ConnectionStateChanged { peer, state })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::config::FramePacing;
    use crate::radio::driver::AdvertiseConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Driver stub that records calls and answers Ok.
    struct RecordingDriver {
        caps: RadioCapabilities,
        calls: Mutex<Vec<String>>,
    }

    use crate::radio::driver::RadioCapabilities;

    impl RecordingDriver {
        fn new(caps: RadioCapabilities) -> Arc<Self> {
            Arc::new(Self {
                caps,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().push(call.into());
        }
    }

    #[async_trait]
    impl RadioDriver for RecordingDriver {
        fn capabilities(&self) -> RadioCapabilities {
            self.caps
        }
        async fn start_scan(&self, _filter: ScanFilter) -> Result<(), RadioError> {
            self.record("start_scan");
            Ok(())
        }
        async fn stop_scan(&self) -> Result<(), RadioError> {
            self.record("stop_scan");
            Ok(())
        }
        async fn connect(&self, peer: &PeerAddr) -> Result<(), RadioError> {
            self.record(format!("connect:{peer}"));
            Ok(())
        }
        async fn disconnect(&self, peer: &PeerAddr) -> Result<(), RadioError> {
            self.record(format!("disconnect:{peer}"));
            Ok(())
        }
        async fn request_mtu(&self, _peer: &PeerAddr, mtu: u16) -> Result<(), RadioError> {
            self.record(format!("request_mtu:{mtu}"));
            Ok(())
        }
        async fn resolve_service(&self, _peer: &PeerAddr) -> Result<(), RadioError> {
            self.record("resolve_service");
            Ok(())
        }
        async fn subscribe(&self, _peer: &PeerAddr) -> Result<(), RadioError> {
            self.record("subscribe");
            Ok(())
        }
        async fn write(&self, _peer: &PeerAddr, frame: &[u8]) -> Result<(), RadioError> {
            self.record(format!("write:{}", frame.len()));
            Ok(())
        }
        async fn notify(&self, _peer: &PeerAddr, _frame: &[u8]) -> Result<(), RadioError> {
            self.record("notify");
            Ok(())
        }
        async fn acknowledge_write(&self, _peer: &PeerAddr) -> Result<(), RadioError> {
            self.record("acknowledge_write");
            Ok(())
        }
        async fn start_advertising(&self, _config: AdvertiseConfig) -> Result<(), RadioError> {
            self.record("start_advertising");
            Ok(())
        }
        async fn stop_advertising(&self) -> Result<(), RadioError> {
            self.record("stop_advertising");
            Ok(())
        }
    }

    fn spawn_session(
        driver: Arc<RecordingDriver>,
    ) -> (
        CentralHandle,
        mpsc::Sender<RadioEvent>,
        mpsc::Receiver<LinkEvent>,
    ) {
        let metrics = Arc::new(LinkMetrics::new());
        let (link_tx, link_rx) = mpsc::channel(64);
        let (handle, event_tx) = CentralSession::spawn(
            driver,
            SharedMtu::new(),
            ReassemblyBuffer::new(metrics.clone()),
            metrics,
            LinkConfig::default().with_frame_pacing(FramePacing::None),
            link_tx,
        );
        (handle, event_tx, link_rx)
    }

    #[tokio::test]
    async fn test_scan_without_capability_is_silent() {
        let driver = RecordingDriver::new(RadioCapabilities {
            can_scan: false,
            can_advertise: true,
            can_accept_connections: true,
        });
        let (handle, _event_tx, _link_rx) = spawn_session(driver.clone());

        handle.scan().await.expect("silent success");
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_send_before_ready_is_not_ready() {
        let driver = RecordingDriver::new(RadioCapabilities::full());
        let (handle, _event_tx, _link_rx) = spawn_session(driver);

        let result = handle.send(vec![1, 2, 3]).await;
        assert!(matches!(result, Err(LinkError::NotReady)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let driver = RecordingDriver::new(RadioCapabilities::full());
        let (handle, _event_tx, _link_rx) = spawn_session(driver);

        handle.disconnect().await.expect("first");
        handle.disconnect().await.expect("second");
    }

    #[tokio::test]
    async fn test_discovery_auto_connects_first_match() {
        let driver = RecordingDriver::new(RadioCapabilities::full());
        let (handle, event_tx, mut link_rx) = spawn_session(driver.clone());

        handle.scan().await.expect("scan");
        let peer = Peer::discovered(PeerAddr::new("node-b"), Some("B".into()), Some(-40));
        event_tx
            .send(RadioEvent::PeerDiscovered { peer })
            .await
            .expect("send event");

        // Discovery event first, then the Connecting transition.
        assert!(matches!(
            link_rx.recv().await.expect("event"),
            LinkEvent::PeerDiscovered(_)
        ));
        assert!(matches!(
            link_rx.recv().await.expect("event"),
            LinkEvent::ConnectionStateChanged {
                state: ConnectionState::Connecting,
                ..
            }
        ));
        let calls = driver.calls();
        assert!(calls.contains(&"start_scan".to_string()));
        assert!(calls.contains(&"stop_scan".to_string()));
        assert!(calls.contains(&"connect:node-b".to_string()));
    }

    #[tokio::test]
    async fn test_report_only_policy_leaves_connecting_to_caller() {
        let driver = RecordingDriver::new(RadioCapabilities::full());
        let metrics = Arc::new(LinkMetrics::new());
        let (link_tx, mut link_rx) = mpsc::channel(64);
        let (handle, event_tx) = CentralSession::spawn(
            driver.clone(),
            SharedMtu::new(),
            ReassemblyBuffer::new(metrics.clone()),
            metrics,
            LinkConfig::default()
                .with_frame_pacing(FramePacing::None)
                .with_scan_policy(ScanPolicy::ReportOnly),
            link_tx,
        );

        handle.scan().await.expect("scan");
        event_tx
            .send(RadioEvent::PeerDiscovered {
                peer: Peer::discovered(PeerAddr::new("node-b"), None, None),
            })
            .await
            .expect("send event");

        assert!(matches!(
            link_rx.recv().await.expect("event"),
            LinkEvent::PeerDiscovered(_)
        ));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        // Still scanning, no connection attempt.
        let calls = driver.calls();
        assert!(!calls.iter().any(|c| c.starts_with("connect")));
        assert!(!calls.contains(&"stop_scan".to_string()));
    }

    #[tokio::test]
    async fn test_connected_triggers_mtu_and_service_resolution() {
        let driver = RecordingDriver::new(RadioCapabilities::full());
        let (handle, event_tx, mut link_rx) = spawn_session(driver.clone());

        let peer = Peer::discovered(PeerAddr::new("node-b"), None, None);
        handle.connect(peer).await.expect("connect");
        let _ = link_rx.recv().await; // Connecting

        event_tx
            .send(RadioEvent::CentralConnectionChanged {
                peer: PeerAddr::new("node-b"),
                state: ConnectionState::Connected,
            })
            .await
            .expect("send event");
        assert!(matches!(
            link_rx.recv().await.expect("event"),
            LinkEvent::ConnectionStateChanged {
                state: ConnectionState::Connected,
                ..
            }
        ));

        event_tx
            .send(RadioEvent::ServiceResolved {
                peer: PeerAddr::new("node-b"),
            })
            .await
            .expect("send event");
        event_tx
            .send(RadioEvent::MtuChanged {
                peer: PeerAddr::new("node-b"),
                mtu: 185,
            })
            .await
            .expect("send event");

        // Once the service resolved, sends are accepted.
        let mut sent = false;
        for _ in 0..50 {
            if handle.send(b"ping".to_vec()).await.is_ok() {
                sent = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(sent, "session never became ready");

        let calls = driver.calls();
        assert!(calls.contains(&"request_mtu:517".to_string()));
        assert!(calls.contains(&"resolve_service".to_string()));
        assert!(calls.contains(&"subscribe".to_string()));
    }

    #[tokio::test]
    async fn test_second_connect_rejected_while_active() {
        let driver = RecordingDriver::new(RadioCapabilities::full());
        let (handle, _event_tx, mut link_rx) = spawn_session(driver);

        handle
            .connect(Peer::discovered(PeerAddr::new("node-b"), None, None))
            .await
            .expect("connect");
        let _ = link_rx.recv().await;

        let result = handle
            .connect(Peer::discovered(PeerAddr::new("node-c"), None, None))
            .await;
        assert!(matches!(result, Err(LinkError::AlreadyConnected)));
    }

    #[tokio::test]
    async fn test_peer_drop_clears_reassembly_and_emits_disconnected() {
        let driver = RecordingDriver::new(RadioCapabilities::full());
        let metrics = Arc::new(LinkMetrics::new());
        let reassembly = ReassemblyBuffer::new(metrics.clone());
        let (link_tx, mut link_rx) = mpsc::channel(64);
        let (handle, event_tx) = CentralSession::spawn(
            driver,
            SharedMtu::new(),
            reassembly.clone(),
            metrics,
            LinkConfig::default().with_frame_pacing(FramePacing::None),
            link_tx,
        );

        let addr = PeerAddr::new("node-b");
        handle
            .connect(Peer::discovered(addr.clone(), None, None))
            .await
            .expect("connect");
        let _ = link_rx.recv().await; // Connecting

        // Half a message in flight for this peer.
        let frames = frame::fragment_with_id(&vec![9u8; 60], 23, 1).expect("fragment");
        reassembly.add_fragment(&addr, &frames[0]);
        assert_eq!(reassembly.in_flight(), 1);

        event_tx
            .send(RadioEvent::CentralConnectionChanged {
                peer: addr.clone(),
                state: ConnectionState::Disconnected,
            })
            .await
            .expect("send event");

        assert!(matches!(
            link_rx.recv().await.expect("event"),
            LinkEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
                ..
            }
        ));
        assert_eq!(reassembly.in_flight(), 0);
    }
}
