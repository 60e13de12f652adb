//! Peer model and connection state machine.
//!
//! A peer is a remote node identified by an opaque transport address. The
//! engine tracks at most one active initiator-role peer and any number of
//! responder-role peers; both use the same state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque transport address of a remote node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr(pub String);

impl PeerAddr {
    /// Create a peer address from anything string-like.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerAddr {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Link state with a single peer.
///
/// `Connected` is only reachable from `Connecting`; a terminal radio error
/// forces `Disconnected` from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Disconnected` is always reachable (radio errors are terminal), and
    /// re-entering the current state is allowed so duplicate radio callbacks
    /// stay harmless.
    pub fn may_enter(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Disconnected) => true,
            (s, n) if s == n => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Disconnecting) => true,
            (Connecting, Disconnecting) => true,
            _ => false,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Illegal state transition attempted on a peer.
#[derive(Debug, Error, Clone)]
#[error("Illegal connection state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// A remote node as seen by either role.
///
/// Created when discovered (initiator) or when a connection attempt arrives
/// (responder); reset when the link drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// Transport address (unique identifier).
    pub addr: PeerAddr,
    /// Advertised display name, if any.
    pub name: Option<String>,
    /// Last known signal strength in dBm.
    pub rssi: Option<i8>,
    /// Current link state.
    pub state: ConnectionState,
}

impl Peer {
    /// A newly discovered, not-yet-connected peer.
    pub fn discovered(addr: PeerAddr, name: Option<String>, rssi: Option<i8>) -> Self {
        Self {
            addr,
            name,
            rssi,
            state: ConnectionState::Disconnected,
        }
    }

    /// Apply a state change, enforcing the legal transitions.
    pub fn transition(&mut self, next: ConnectionState) -> Result<(), InvalidTransition> {
        if !self.state.may_enter(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_only_from_connecting() {
        assert!(ConnectionState::Connecting.may_enter(ConnectionState::Connected));
        assert!(!ConnectionState::Disconnected.may_enter(ConnectionState::Connected));
        assert!(!ConnectionState::Disconnecting.may_enter(ConnectionState::Connected));
    }

    #[test]
    fn test_disconnected_reachable_from_anywhere() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
        ] {
            assert!(state.may_enter(ConnectionState::Disconnected));
        }
    }

    #[test]
    fn test_reentry_is_harmless() {
        assert!(ConnectionState::Connecting.may_enter(ConnectionState::Connecting));
        assert!(ConnectionState::Connected.may_enter(ConnectionState::Connected));
    }

    #[test]
    fn test_peer_transition_enforced() {
        let mut peer = Peer::discovered(PeerAddr::new("aa:bb"), None, Some(-60));
        assert_eq!(peer.state, ConnectionState::Disconnected);

        peer.transition(ConnectionState::Connecting).expect("legal");
        peer.transition(ConnectionState::Connected).expect("legal");
        peer.transition(ConnectionState::Disconnecting).expect("legal");
        peer.transition(ConnectionState::Disconnected).expect("legal");

        let err = peer.transition(ConnectionState::Connected);
        assert!(err.is_err());
    }

    #[test]
    fn test_peer_serialization_roundtrip() {
        let peer = Peer::discovered(PeerAddr::new("node-7"), Some("Relay".into()), Some(-42));
        let bytes = bincode::serialize(&peer).expect("serialize");
        let restored: Peer = bincode::deserialize(&bytes).expect("deserialize");
        assert_eq!(restored.addr, peer.addr);
        assert_eq!(restored.name, peer.name);
        assert_eq!(restored.rssi, peer.rssi);
    }
}
