// MeshLink: opportunistic short-range mesh messaging.
//
// "Will this still deliver a message when the towers are down
//  and the only thing left is the radio in your pocket?"
//
// If the answer is no, it doesn't belong in core.

pub mod link;
pub mod mesh;
pub mod radio;

pub use link::{
    ConnectionState, FramePacing, LinkConfig, LinkError, LinkEvent, MetricsSnapshot, Peer,
    PeerAddr, ScanPolicy, MAX_MTU, MIN_MTU,
};
pub use mesh::{MeshLink, PreferredRole};
pub use radio::{
    LoopbackConfig, LoopbackRadio, RadioCapabilities, RadioDriver, RadioError, RadioEvent,
    MESH_SERVICE_UUID,
};
