//! Negotiated-MTU cell shared by both role sessions.
//!
//! Negotiation itself happens in the radio stack; the engine only asks for
//! the maximum and records whatever arrives. One value serves the whole
//! link engine: when several peers negotiate different MTUs (responder
//! role), the most recent result wins for all subsequent fragmentation.
//! That is a deliberate simplification, not an oversight.

use crate::link::peer::PeerAddr;
use crate::radio::driver::{RadioDriver, RadioError};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Minimum link MTU, also the default before any negotiation.
pub const MIN_MTU: u16 = 23;

/// Largest MTU the radio stack will grant.
pub const MAX_MTU: u16 = 517;

/// Single-writer, many-reader negotiated MTU value.
///
/// Cloning shares the underlying cell.
#[derive(Debug, Clone)]
pub struct SharedMtu {
    value: Arc<AtomicU16>,
}

impl SharedMtu {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU16::new(MIN_MTU)),
        }
    }

    /// Current negotiated MTU. Readers always see the latest value, never
    /// one frozen at send time.
    pub fn current(&self) -> u16 {
        self.value.load(Ordering::Acquire)
    }

    /// Ask the link with `peer` to negotiate `mtu`. Purely advisory; the
    /// granted value arrives asynchronously via [`SharedMtu::on_negotiated`].
    pub async fn request_negotiation(
        &self,
        driver: &dyn RadioDriver,
        peer: &PeerAddr,
        mtu: u16,
    ) -> Result<(), RadioError> {
        debug!(peer = %peer, requested = mtu, "Requesting MTU negotiation");
        driver.request_mtu(peer, mtu).await
    }

    /// Record a completed negotiation. Out-of-range results are clamped to
    /// the nearest bound; concurrent negotiations from both roles resolve
    /// last-write-wins.
    pub fn on_negotiated(&self, mtu: u16) {
        let clamped = mtu.clamp(MIN_MTU, MAX_MTU);
        let previous = self.value.swap(clamped, Ordering::AcqRel);
        debug!(previous, negotiated = mtu, effective = clamped, "MTU updated");
    }
}

impl Default for SharedMtu {
    fn default() -> Self {
        Self::new()
    }
}
