//! Radio driver contract.
//!
//! The engine never touches a radio stack directly. A platform driver
//! implements [`RadioDriver`] for the outgoing side and pushes
//! [`RadioEvent`]s into a channel for everything asynchronous: the engine's
//! logic is fully testable with an injected in-memory driver.
//!
//! The contract assumes a connection-oriented transport with a negotiable
//! MTU, a write primitive toward an accepting node and a notify/subscribe
//! primitive back from it. Whether that is BLE GATT or something else is
//! the driver's business.

use crate::link::peer::{ConnectionState, Peer, PeerAddr};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// What the local radio hardware can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioCapabilities {
    /// Can discover advertising nodes (initiator prerequisite).
    pub can_scan: bool,
    /// Can advertise the mesh service (responder prerequisite).
    pub can_advertise: bool,
    /// Can accept inbound connections.
    pub can_accept_connections: bool,
}

impl RadioCapabilities {
    /// Full dual-role capability.
    pub fn full() -> Self {
        Self {
            can_scan: true,
            can_advertise: true,
            can_accept_connections: true,
        }
    }
}

/// Discovery restriction: only nodes exposing this service match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    pub service: Uuid,
}

/// Advertising parameters for the responder role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseConfig {
    pub service: Uuid,
    /// Name included in the scan response, if the radio supports one.
    pub local_name: Option<String>,
}

/// Errors surfaced by a radio driver.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum RadioError {
    #[error("Radio capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to peer: {0}")]
    NotConnected(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Notify failed: {0}")]
    NotifyFailed(String),

    #[error("Internal radio error: {0}")]
    Internal(String),
}

/// Asynchronous happenings the driver reports to the engine.
///
/// Events for the initiator side of a link and events for accepted inbound
/// peers use distinct variants; the facade routes them to the right
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RadioEvent {
    /// Scan match (initiator).
    PeerDiscovered { peer: Peer },
    /// State change on the outbound link (initiator).
    CentralConnectionChanged {
        peer: PeerAddr,
        state: ConnectionState,
    },
    /// The remote mesh service endpoint was located (initiator).
    ServiceResolved { peer: PeerAddr },
    /// MTU negotiation completed for a link (either role).
    MtuChanged { peer: PeerAddr, mtu: u16 },
    /// Unsolicited inbound frame pushed by a responder (initiator).
    Notification { peer: PeerAddr, frame: Vec<u8> },
    /// A remote initiator connected to us (responder).
    PeerConnected { peer: Peer },
    /// A remote initiator dropped its connection (responder).
    PeerDisconnected { peer: PeerAddr },
    /// Inbound frame written by a remote initiator (responder).
    InboundWrite {
        peer: PeerAddr,
        frame: Vec<u8>,
        /// Whether the transport expects an application-level response.
        response_needed: bool,
    },
    /// An outbound write completed (initiator).
    WriteAcked { peer: PeerAddr },
}

/// The engine's view of the platform radio stack.
///
/// All methods are requests; their asynchronous consequences come back as
/// [`RadioEvent`]s. Drivers must not block: a write that can never
/// complete is the driver's problem to time out.
#[async_trait]
pub trait RadioDriver: Send + Sync {
    /// Capability report, queried before each role starts.
    fn capabilities(&self) -> RadioCapabilities;

    /// Begin discovery restricted to `filter`.
    async fn start_scan(&self, filter: ScanFilter) -> Result<(), RadioError>;

    /// Stop discovery. Safe to call when not scanning.
    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Open an outbound connection.
    async fn connect(&self, peer: &PeerAddr) -> Result<(), RadioError>;

    /// Tear down the link with `peer`, whichever side opened it.
    async fn disconnect(&self, peer: &PeerAddr) -> Result<(), RadioError>;

    /// Ask the link to negotiate `mtu`; the result arrives as
    /// [`RadioEvent::MtuChanged`] and may be lower than requested.
    async fn request_mtu(&self, peer: &PeerAddr, mtu: u16) -> Result<(), RadioError>;

    /// Locate the remote mesh service endpoint.
    async fn resolve_service(&self, peer: &PeerAddr) -> Result<(), RadioError>;

    /// Subscribe to the remote endpoint's notifications.
    async fn subscribe(&self, peer: &PeerAddr) -> Result<(), RadioError>;

    /// Write one frame to the remote endpoint (initiator to responder).
    async fn write(&self, peer: &PeerAddr, frame: &[u8]) -> Result<(), RadioError>;

    /// Push one frame to a subscribed peer (responder to initiator).
    async fn notify(&self, peer: &PeerAddr, frame: &[u8]) -> Result<(), RadioError>;

    /// Answer an inbound write that asked for a response. Carries no
    /// status of its own.
    async fn acknowledge_write(&self, peer: &PeerAddr) -> Result<(), RadioError>;

    /// Expose the mesh service and accept connections.
    async fn start_advertising(&self, config: AdvertiseConfig) -> Result<(), RadioError>;

    /// Withdraw the advertisement. Safe to call when not advertising.
    async fn stop_advertising(&self) -> Result<(), RadioError>;
}
