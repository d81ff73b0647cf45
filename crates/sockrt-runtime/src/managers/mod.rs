//! Stateful managers for the sockrt runtime
//!
//! Each manager owns one id-keyed collection (payloads, descriptors, peers)
//! behind a single lock, with per-object state guarded by the object itself.

pub mod data;
pub mod descriptor;
pub mod peer;

pub use data::{DataManager, DataStats};
pub use descriptor::{
    Descriptor, DescriptorError, DescriptorKind, DescriptorManager, DescriptorStats,
    DescriptorStatus, DescriptorSummary, DirectoryEntry, DirentType, Liveness,
};
pub use peer::{
    BufferKind, CloseCallback, Peer, PeerError, PeerInfo, PeerKind, PeerManager, PeerState,
    PeerStats, ReceiveCallback, ReceiveEvent,
};
