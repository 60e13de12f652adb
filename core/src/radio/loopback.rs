//! In-memory radio: two driver ends wired back to back.
//!
//! Stands in for a real radio stack so the engine, the integration tests
//! and the demo run without hardware. Either end can play either role;
//! the pair tracks one link per initiating direction, so two nodes can be
//! central toward each other at the same time, exactly like two phones in
//! range.

use crate::radio::driver::{
    AdvertiseConfig, RadioCapabilities, RadioDriver, RadioError, RadioEvent, ScanFilter,
};
use crate::link::mtu::MIN_MTU;
use crate::link::peer::{ConnectionState, Peer, PeerAddr};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-end setup for a loopback pair.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub addr: String,
    pub name: Option<String>,
    pub capabilities: RadioCapabilities,
    /// Largest MTU this end's "hardware" grants during negotiation.
    pub supported_mtu: u16,
    /// Simulate the platform denying the radio permission.
    pub permission_denied: bool,
}

impl LoopbackConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            name: None,
            capabilities: RadioCapabilities::full(),
            supported_mtu: 247,
            permission_denied: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_capabilities(mut self, caps: RadioCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    pub fn with_supported_mtu(mut self, mtu: u16) -> Self {
        self.supported_mtu = mtu;
        self
    }

    pub fn with_permission_denied(mut self, denied: bool) -> Self {
        self.permission_denied = denied;
        self
    }
}

/// One directed link inside the pair (index = initiating side).
#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    subscribed: bool,
}

struct EndState {
    config: LoopbackConfig,
    event_tx: mpsc::Sender<RadioEvent>,
    advertising: bool,
    scanning: bool,
}

impl EndState {
    fn addr(&self) -> PeerAddr {
        PeerAddr::new(self.config.addr.clone())
    }

    fn as_peer(&self) -> Peer {
        Peer::discovered(self.addr(), self.config.name.clone(), Some(-50))
    }

    fn emit(&self, event: RadioEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!(addr = %self.config.addr, "Loopback event channel full; dropping event");
        }
    }
}

struct Shared {
    ends: [EndState; 2],
    /// links[i] is the link initiated by side i.
    links: [LinkState; 2],
}

/// One end of an in-memory radio pair.
pub struct LoopbackRadio {
    side: usize,
    shared: Arc<Mutex<Shared>>,
    fail_writes: AtomicBool,
}

impl LoopbackRadio {
    /// Build a connected pair; each end comes with its event stream.
    pub fn pair(
        a: LoopbackConfig,
        b: LoopbackConfig,
    ) -> (
        (LoopbackRadio, mpsc::Receiver<RadioEvent>),
        (LoopbackRadio, mpsc::Receiver<RadioEvent>),
    ) {
        let (tx_a, rx_a) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Mutex::new(Shared {
            ends: [
                EndState {
                    config: a,
                    event_tx: tx_a,
                    advertising: false,
                    scanning: false,
                },
                EndState {
                    config: b,
                    event_tx: tx_b,
                    advertising: false,
                    scanning: false,
                },
            ],
            links: [LinkState::default(), LinkState::default()],
        }));
        (
            (
                LoopbackRadio {
                    side: 0,
                    shared: shared.clone(),
                    fail_writes: AtomicBool::new(false),
                },
                rx_a,
            ),
            (
                LoopbackRadio {
                    side: 1,
                    shared,
                    fail_writes: AtomicBool::new(false),
                },
                rx_b,
            ),
        )
    }

    /// Make subsequent `write`/`notify` calls fail (test hook).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn other(&self) -> usize {
        1 - self.side
    }

    fn check_permission(&self, shared: &Shared, what: &str) -> Result<(), RadioError> {
        if shared.ends[self.side].config.permission_denied {
            return Err(RadioError::PermissionDenied(format!(
                "{what} denied by platform"
            )));
        }
        Ok(())
    }

    fn expect_other(&self, shared: &Shared, peer: &PeerAddr) -> Result<(), RadioError> {
        if shared.ends[self.other()].config.addr != peer.0 {
            return Err(RadioError::NotConnected(peer.0.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl RadioDriver for LoopbackRadio {
    fn capabilities(&self) -> RadioCapabilities {
        self.shared.lock().ends[self.side].config.capabilities
    }

    async fn start_scan(&self, _filter: ScanFilter) -> Result<(), RadioError> {
        let mut shared = self.shared.lock();
        self.check_permission(&shared, "scan")?;
        shared.ends[self.side].scanning = true;
        if shared.ends[self.other()].advertising {
            let peer = shared.ends[self.other()].as_peer();
            shared.ends[self.side].emit(RadioEvent::PeerDiscovered { peer });
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), RadioError> {
        self.shared.lock().ends[self.side].scanning = false;
        Ok(())
    }

    async fn connect(&self, peer: &PeerAddr) -> Result<(), RadioError> {
        let mut shared = self.shared.lock();
        self.expect_other(&shared, peer)
            .map_err(|_| RadioError::ConnectionFailed(format!("unknown peer {peer}")))?;
        let other = self.other();
        if !shared.ends[other].config.capabilities.can_accept_connections
            || !shared.ends[other].advertising
        {
            return Err(RadioError::ConnectionFailed(format!(
                "{peer} is not accepting connections"
            )));
        }
        shared.links[self.side].connected = true;
        let me = shared.ends[self.side].as_peer();
        shared.ends[self.side].emit(RadioEvent::CentralConnectionChanged {
            peer: peer.clone(),
            state: ConnectionState::Connected,
        });
        shared.ends[other].emit(RadioEvent::PeerConnected { peer: me });
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerAddr) -> Result<(), RadioError> {
        let mut shared = self.shared.lock();
        if self.expect_other(&shared, peer).is_err() {
            return Ok(()); // unknown peer, nothing to drop
        }
        let other = self.other();

        // Link we initiated: we are the central side.
        if shared.links[self.side].connected {
            shared.links[self.side].connected = false;
            shared.links[self.side].subscribed = false;
            shared.ends[self.side].emit(RadioEvent::CentralConnectionChanged {
                peer: peer.clone(),
                state: ConnectionState::Disconnected,
            });
            let me = shared.ends[self.side].addr();
            shared.ends[other].emit(RadioEvent::PeerDisconnected { peer: me });
        }
        // Link the peer initiated: we are force-dropping an inbound peer.
        if shared.links[other].connected {
            shared.links[other].connected = false;
            shared.links[other].subscribed = false;
            let me = shared.ends[self.side].addr();
            shared.ends[self.side].emit(RadioEvent::PeerDisconnected { peer: peer.clone() });
            shared.ends[other].emit(RadioEvent::CentralConnectionChanged {
                peer: me,
                state: ConnectionState::Disconnected,
            });
        }
        Ok(())
    }

    async fn request_mtu(&self, peer: &PeerAddr, mtu: u16) -> Result<(), RadioError> {
        let shared = self.shared.lock();
        self.expect_other(&shared, peer)?;
        let other = self.other();
        if !shared.links[self.side].connected {
            return Err(RadioError::NotConnected(peer.0.clone()));
        }
        let granted = mtu
            .min(shared.ends[other].config.supported_mtu)
            .max(MIN_MTU);
        debug!(requested = mtu, granted, "Loopback MTU negotiation");
        shared.ends[self.side].emit(RadioEvent::MtuChanged {
            peer: peer.clone(),
            mtu: granted,
        });
        let me = shared.ends[self.side].addr();
        shared.ends[other].emit(RadioEvent::MtuChanged {
            peer: me,
            mtu: granted,
        });
        Ok(())
    }

    async fn resolve_service(&self, peer: &PeerAddr) -> Result<(), RadioError> {
        let shared = self.shared.lock();
        self.expect_other(&shared, peer)?;
        if !shared.links[self.side].connected {
            return Err(RadioError::NotConnected(peer.0.clone()));
        }
        shared.ends[self.side].emit(RadioEvent::ServiceResolved { peer: peer.clone() });
        Ok(())
    }

    async fn subscribe(&self, peer: &PeerAddr) -> Result<(), RadioError> {
        let mut shared = self.shared.lock();
        self.expect_other(&shared, peer)?;
        if !shared.links[self.side].connected {
            return Err(RadioError::NotConnected(peer.0.clone()));
        }
        shared.links[self.side].subscribed = true;
        Ok(())
    }

    async fn write(&self, peer: &PeerAddr, frame: &[u8]) -> Result<(), RadioError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(RadioError::WriteFailed("injected failure".into()));
        }
        let shared = self.shared.lock();
        self.expect_other(&shared, peer)?;
        if !shared.links[self.side].connected {
            return Err(RadioError::NotConnected(peer.0.clone()));
        }
        let me = shared.ends[self.side].addr();
        shared.ends[self.other()].emit(RadioEvent::InboundWrite {
            peer: me,
            frame: frame.to_vec(),
            response_needed: true,
        });
        Ok(())
    }

    async fn notify(&self, peer: &PeerAddr, frame: &[u8]) -> Result<(), RadioError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(RadioError::NotifyFailed("injected failure".into()));
        }
        let shared = self.shared.lock();
        self.expect_other(&shared, peer)?;
        let other = self.other();
        // The peer must have connected to us and subscribed.
        if !shared.links[other].connected || !shared.links[other].subscribed {
            return Err(RadioError::NotConnected(peer.0.clone()));
        }
        let me = shared.ends[self.side].addr();
        shared.ends[other].emit(RadioEvent::Notification {
            peer: me,
            frame: frame.to_vec(),
        });
        Ok(())
    }

    async fn acknowledge_write(&self, peer: &PeerAddr) -> Result<(), RadioError> {
        let shared = self.shared.lock();
        self.expect_other(&shared, peer)?;
        let me = shared.ends[self.side].addr();
        shared.ends[self.other()].emit(RadioEvent::WriteAcked { peer: me });
        Ok(())
    }

    async fn start_advertising(&self, _config: AdvertiseConfig) -> Result<(), RadioError> {
        let mut shared = self.shared.lock();
        self.check_permission(&shared, "advertise")?;
        shared.ends[self.side].advertising = true;
        if shared.ends[self.other()].scanning {
            let me = shared.ends[self.side].as_peer();
            shared.ends[self.other()].emit(RadioEvent::PeerDiscovered { peer: me });
        }
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        self.shared.lock().ends[self.side].advertising = false;
        Ok(())
    }
}
