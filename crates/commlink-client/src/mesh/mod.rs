//! Mesh transports: spatial partition, room reconciliation, topology.
//!
//! The WebRTC mesh itself (ICE, relays, island directory) is injected
//! through [`MeshConnector`]; this module decides which topics to join, how
//! each packet case travels on the mesh and how the mesh looks for
//! diagnostics.

pub mod adapter;
pub mod frame;
pub mod partition;
pub mod peers;
pub mod reconcile;
pub mod topology;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use commlink_core::error::Result;

pub use adapter::{MeshAdapter, MeshAdapterConfig};
pub use frame::{decode_frame, encode_frame, MeshFrame};
pub use partition::{
    position_hash, position_to_parcel, topics_for, CommunicationArea, Parcel, DEFAULT_COMM_RADIUS,
    PARCEL_SIZE,
};
pub use peers::PeerIdentityMap;
pub use reconcile::{ReconcileReport, RoomReconciler};
pub use topology::{build_topology, TopologyParams, TopologySnapshot};

/// Transport status string for sends into a topic that is not joined.
pub const ROOM_NOT_JOINED: &str = "room-not-joined";

/// Delivery parameters of one mesh message class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshMessageType {
    pub name: &'static str,
    pub ttl: u8,
    pub optimistic: bool,
    pub reliable: bool,
    pub discard_older_than: Option<Duration>,
    pub expiration: Option<Duration>,
}

impl MeshMessageType {
    pub const fn reliable(name: &'static str) -> Self {
        Self {
            name,
            ttl: 10,
            optimistic: false,
            reliable: true,
            discard_older_than: None,
            expiration: None,
        }
    }

    pub const fn unreliable(name: &'static str) -> Self {
        Self {
            name,
            ttl: 10,
            optimistic: true,
            reliable: false,
            discard_older_than: None,
            expiration: None,
        }
    }

    pub const fn scene() -> Self {
        Self {
            name: "scene",
            ttl: 10,
            optimistic: true,
            reliable: true,
            discard_older_than: None,
            expiration: Some(Duration::from_secs(10)),
        }
    }

    pub const fn voice() -> Self {
        Self {
            name: "voice",
            ttl: 5,
            optimistic: true,
            reliable: false,
            discard_older_than: Some(Duration::from_millis(2000)),
            expiration: Some(Duration::from_secs(10)),
        }
    }

    pub const fn profile(name: &'static str) -> Self {
        Self {
            name,
            ttl: 10,
            optimistic: true,
            reliable: true,
            discard_older_than: None,
            expiration: Some(Duration::from_secs(10)),
        }
    }
}

/// Status pushed by the mesh or its island directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshStatus {
    Connecting,
    Connected,
    RealmFull,
    ReconnectionError,
    IdTaken,
    Error,
}

impl MeshStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MeshStatus::Connecting => "connecting",
            MeshStatus::Connected => "connected",
            MeshStatus::RealmFull => "realm-full",
            MeshStatus::ReconnectionError => "reconnection-error",
            MeshStatus::IdTaken => "id-taken",
            MeshStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayHop {
    pub id: String,
    pub hops: u32,
}

/// Remote peer with the relay chain it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownPeer {
    pub id: String,
    pub reachable_through: Vec<RelayHop>,
}

/// Island member as reported by the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct IslandPeer {
    pub id: String,
    pub position: Option<[f32; 3]>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    Packet {
        sender: String,
        room: String,
        payload: Bytes,
    },
    IslandChanged {
        island: String,
        peers: Vec<IslandPeer>,
    },
    PeerLeftIsland(String),
    PeerLinked(String),
    PeerUnlinked(String),
    Status(MeshStatus),
}

/// Handle to a running mesh peer.
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Resolve once at least one peer connection exists.
    async fn establish(&self, timeout: Duration) -> Result<()>;
    fn connected_count(&self) -> usize;

    async fn join_room(&self, topic: &str) -> Result<()>;
    async fn leave_room(&self, topic: &str) -> Result<()>;
    fn current_rooms(&self) -> Vec<String>;

    async fn send(&self, topic: &str, payload: Bytes, ty: &MeshMessageType) -> Result<()>;

    fn fully_connected_peer_ids(&self) -> Vec<String>;
    fn known_peers(&self) -> Vec<KnownPeer>;
    fn set_peer_position(&self, peer_id: &str, position: [f32; 3]);

    async fn dispose(&self);
}

/// Relay suspension tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySuspension {
    pub interval: Duration,
    pub duration: Duration,
}

/// Distances in parcels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPositioning {
    pub max_connection_distance: u32,
    pub nearby_peers_distance: u32,
    pub disconnect_distance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPeerConfig {
    pub peer_id: String,
    /// Island directory URL (lighthouse only).
    pub directory_url: Option<String>,
    pub credential: Option<String>,
    pub preferred_island: Option<String>,
    pub target_connections: usize,
    pub max_connections: usize,
    pub positioning: PeerPositioning,
    pub relay_suspension: RelaySuspension,
}

impl MeshPeerConfig {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            directory_url: None,
            credential: None,
            preferred_island: None,
            target_connections: 4,
            max_connections: 6,
            positioning: PeerPositioning {
                max_connection_distance: 4,
                nearby_peers_distance: 5,
                disconnect_distance: 6,
            },
            relay_suspension: RelaySuspension {
                interval: Duration::from_millis(750),
                duration: Duration::from_millis(5000),
            },
        }
    }
}

pub struct MeshSession {
    pub transport: Arc<dyn MeshTransport>,
    pub events: mpsc::Receiver<MeshEvent>,
}

/// Creates mesh peers. Must not perform network I/O; that happens in
/// [`MeshTransport::establish`].
pub trait MeshConnector: Send + Sync {
    fn create(&self, config: MeshPeerConfig) -> Result<MeshSession>;
}
