//! Link engine configuration.

use crate::link::mtu::{MAX_MTU, MIN_MTU};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Pacing between successive frame writes of one message.
///
/// The radio stack tolerates only a few outstanding writes; spacing frames
/// out trades throughput for delivery on busy links. `None` disables
/// pacing (loopback tests run with it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramePacing {
    /// Issue writes back to back.
    None,
    /// Sleep this long between writes.
    Fixed(Duration),
}

impl FramePacing {
    pub fn delay(&self) -> Option<Duration> {
        match self {
            FramePacing::None => None,
            FramePacing::Fixed(d) => Some(*d),
        }
    }
}

/// What the initiator does with scan matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanPolicy {
    /// Stop scanning on the first match and connect to it immediately.
    ConnectFirstMatch,
    /// Report matches and leave connecting to the caller.
    ReportOnly,
}

/// Invalid [`LinkConfig`] values.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Channel capacity must be > 0")]
    ZeroCapacity,
    #[error("Frame pacing of {0:?} exceeds one second")]
    ExcessivePacing(Duration),
    #[error("MTU request target {0} outside [{MIN_MTU}, {MAX_MTU}]")]
    MtuTargetOutOfRange(u16),
}

/// Tunables for the link engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Pacing between frame writes (default 8 ms).
    pub frame_pacing: FramePacing,
    /// Initiator behavior on scan matches.
    pub scan_policy: ScanPolicy,
    /// MTU the initiator asks the radio for after connecting.
    pub mtu_request: u16,
    /// Capacity of the command and event channels.
    pub channel_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frame_pacing: FramePacing::Fixed(Duration::from_millis(8)),
            scan_policy: ScanPolicy::ConnectFirstMatch,
            mtu_request: MAX_MTU,
            channel_capacity: 64,
        }
    }
}

impl LinkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame_pacing(mut self, pacing: FramePacing) -> Self {
        self.frame_pacing = pacing;
        self
    }

    pub fn with_scan_policy(mut self, policy: ScanPolicy) -> Self {
        self.scan_policy = policy;
        self
    }

    pub fn with_mtu_request(mut self, mtu: u16) -> Self {
        self.mtu_request = mtu;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if let Some(delay) = self.frame_pacing.delay() {
            if delay > Duration::from_secs(1) {
                return Err(ConfigError::ExcessivePacing(delay));
            }
        }
        if self.mtu_request < MIN_MTU || self.mtu_request > MAX_MTU {
            return Err(ConfigError::MtuTargetOutOfRange(self.mtu_request));
        }
        Ok(())
    }
}
