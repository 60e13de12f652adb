//! Radio driver boundary.
//!
//! - **driver**: the [`RadioDriver`] trait, [`RadioEvent`] stream and
//!   capability report a platform radio stack implements.
//! - **loopback**: an in-memory driver pair for tests and demos.
//!
//! Service identifiers live here too; a node only talks to nodes exposing
//! the same mesh service.

pub mod driver;
pub mod loopback;

use uuid::Uuid;

/// Service identifier every mesh node advertises and scans for.
pub const MESH_SERVICE_UUID: Uuid = Uuid::from_u128(0x4D4C_0001_9E2B_4A57_8F10_52C60A3B7E41);

/// Characteristic-style endpoint carrying message frames.
pub const MESSAGE_ENDPOINT_UUID: Uuid = Uuid::from_u128(0x4D4C_0002_9E2B_4A57_8F10_52C60A3B7E41);

pub use driver::{
    AdvertiseConfig, RadioCapabilities, RadioDriver, RadioError, RadioEvent, ScanFilter,
};
pub use loopback::{LoopbackConfig, LoopbackRadio};
