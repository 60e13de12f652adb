//! The link-layer transport engine.
//!
//! - **frame**: stateless fragmentation codec (3-byte header + chunk)
//! - **mtu**: the shared negotiated-MTU cell
//! - **reassembly**: per-peer collection of frames into full payloads
//! - **peer**: peer model and connection state machine
//! - **central**: initiator session (discover, connect, send)
//! - **peripheral**: responder session (advertise, accept, broadcast)
//! - **config** / **metrics**: engine tunables and counters

pub mod central;
pub mod config;
pub mod frame;
pub mod metrics;
pub mod mtu;
pub mod peer;
pub mod peripheral;
pub mod reassembly;

use crate::radio::driver::RadioError;
use config::ConfigError;
use frame::FrameError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use central::{CentralHandle, CentralSession};
pub use config::{FramePacing, LinkConfig, ScanPolicy};
pub use metrics::{LinkMetrics, MetricsSnapshot};
pub use mtu::{SharedMtu, MAX_MTU, MIN_MTU};
pub use peer::{ConnectionState, Peer, PeerAddr};
pub use peripheral::{PeripheralHandle, PeripheralSession};
pub use reassembly::ReassemblyBuffer;

/// Events the engine surfaces to the application.
///
/// Merged across both roles; the application never learns which role a
/// payload or state change came through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LinkEvent {
    /// A peer's link state changed.
    ConnectionStateChanged {
        peer: PeerAddr,
        state: ConnectionState,
    },
    /// Discovery produced a match.
    PeerDiscovered(Peer),
    /// A full, reassembled payload arrived. Never raw frames.
    PayloadReceived(Vec<u8>),
}

/// Errors returned to callers of the link engine.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// The platform refused radio access. Not retried by the engine.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Send attempted before a usable link exists.
    #[error("Link not ready")]
    NotReady,

    /// The initiator already has an active peer.
    #[error("Already connected")]
    AlreadyConnected,

    /// Fragmentation failed (bad MTU or oversized payload).
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Driver-reported failure other than a permission problem.
    #[error("Radio error: {0}")]
    Radio(RadioError),

    /// Invalid engine configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The session task is gone.
    #[error("Link session not running")]
    SessionClosed,
}

impl From<RadioError> for LinkError {
    fn from(err: RadioError) -> Self {
        match err {
            RadioError::PermissionDenied(msg) => LinkError::PermissionDenied(msg),
            other => LinkError::Radio(other),
        }
    }
}
