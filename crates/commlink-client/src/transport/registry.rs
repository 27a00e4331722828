//! Protocol registry: `protocol:url` connection strings to room connections.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use url::Url;

use commlink_core::error::{CommsError, Result};

use super::link::{LinkAdapter, LinkConnector, LinkEndpoint};
use super::offline::OfflineAdapter;
use crate::context::{CommsIdentity, PositionReader};
use crate::mesh::{MeshAdapter, MeshAdapterConfig, MeshConnector, MeshPeerConfig};
use crate::obs::CommsMetrics;
use crate::room::{PacketRoomConnection, RoomConnection, SimulationRoom, SimulatorParams};

/// How a transport relates to the network; drives swap rules in the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Local,
    Direct,
    Mesh,
    Synthetic,
}

/// Physical connectors supplied by the embedding application.
#[derive(Clone, Default)]
pub struct TransportConnectors {
    pub ws_room: Option<Arc<dyn LinkConnector>>,
    pub livekit: Option<Arc<dyn LinkConnector>>,
    pub p2p: Option<Arc<dyn MeshConnector>>,
    pub lighthouse: Option<Arc<dyn MeshConnector>>,
}

/// Everything a constructor may use.
#[derive(Clone)]
pub struct TransportParams {
    /// Connection string without the `protocol:` prefix.
    pub url: String,
    pub identity: CommsIdentity,
    pub position_reader: PositionReader,
    pub island_id: Option<String>,
    pub comm_radius: i32,
    pub connect_timeout: Duration,
    pub connectors: TransportConnectors,
    pub metrics: Arc<CommsMetrics>,
}

pub trait TransportConstructor: Send + Sync {
    fn protocol(&self) -> &'static str;
    fn kind(&self) -> TransportKind;
    /// Must not touch the network; that happens in `connect`.
    fn build(&self, params: &TransportParams) -> Result<Arc<dyn RoomConnection>>;
}

/// Split at the first `:`. Without one the protocol is empty.
pub fn split_connection_string(connection_string: &str) -> (&str, &str) {
    connection_string
        .split_once(':')
        .unwrap_or(("", connection_string))
}

/// Prefix `wss://` unless a ws scheme is present.
pub fn normalize_ws_url(url: &str) -> String {
    if url.starts_with("ws:") || url.starts_with("wss:") {
        url.to_string()
    } else {
        format!("wss://{url}")
    }
}

/// `(origin + path, access_token)` of a livekit url.
pub fn livekit_endpoint(raw: &str) -> Result<(String, String)> {
    let parsed =
        Url::parse(raw).map_err(|e| CommsError::Construction(format!("invalid livekit url: {e}")))?;
    let token = parsed
        .query_pairs()
        .find(|(k, _)| k == "access_token")
        .map(|(_, v)| v.into_owned())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CommsError::Construction("No access token".into()))?;
    let base = format!("{}{}", parsed.origin().ascii_serialization(), parsed.path());
    Ok((base, token))
}

fn missing_connector(protocol: &str) -> CommsError {
    CommsError::Construction(format!("no connector registered for {protocol}"))
}

fn packet_room(params: &TransportParams, adapter: Arc<dyn super::CommsAdapter>) -> Arc<dyn RoomConnection> {
    Arc::new(PacketRoomConnection::new(
        adapter,
        params.identity.address.clone(),
        Arc::clone(&params.metrics),
    ))
}

struct OfflineTransport;

impl TransportConstructor for OfflineTransport {
    fn protocol(&self) -> &'static str {
        "offline"
    }
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }
    fn build(&self, params: &TransportParams) -> Result<Arc<dyn RoomConnection>> {
        Ok(packet_room(params, Arc::new(OfflineAdapter::new())))
    }
}

struct WsRoomTransport;

impl TransportConstructor for WsRoomTransport {
    fn protocol(&self) -> &'static str {
        "ws-room"
    }
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }
    fn build(&self, params: &TransportParams) -> Result<Arc<dyn RoomConnection>> {
        let connector = params
            .connectors
            .ws_room
            .clone()
            .ok_or_else(|| missing_connector(self.protocol()))?;
        let endpoint = LinkEndpoint {
            url: normalize_ws_url(&params.url),
            token: None,
            identity: params.identity.clone(),
        };
        Ok(packet_room(
            params,
            Arc::new(LinkAdapter::new("ws-room", endpoint, connector)),
        ))
    }
}

struct LivekitTransport;

impl TransportConstructor for LivekitTransport {
    fn protocol(&self) -> &'static str {
        "livekit"
    }
    fn kind(&self) -> TransportKind {
        TransportKind::Direct
    }
    fn build(&self, params: &TransportParams) -> Result<Arc<dyn RoomConnection>> {
        let (url, token) = livekit_endpoint(&params.url)?;
        let connector = params
            .connectors
            .livekit
            .clone()
            .ok_or_else(|| missing_connector(self.protocol()))?;
        let endpoint = LinkEndpoint {
            url,
            token: Some(token),
            identity: params.identity.clone(),
        };
        Ok(packet_room(
            params,
            Arc::new(LinkAdapter::new("livekit", endpoint, connector)),
        ))
    }
}

/// Peer mesh with a fixed island, or island mesh fed by a directory.
struct MeshTransportCtor {
    protocol: &'static str,
    with_directory: bool,
}

impl TransportConstructor for MeshTransportCtor {
    fn protocol(&self) -> &'static str {
        self.protocol
    }
    fn kind(&self) -> TransportKind {
        TransportKind::Mesh
    }
    fn build(&self, params: &TransportParams) -> Result<Arc<dyn RoomConnection>> {
        let connector = match self.with_directory {
            true => params.connectors.lighthouse.clone(),
            false => params.connectors.p2p.clone(),
        };
        let connector = connector.ok_or_else(|| missing_connector(self.protocol))?;

        let mut peer = MeshPeerConfig::new(params.identity.address.clone());
        peer.credential = params.identity.credential.clone();
        peer.preferred_island = params.island_id.clone();
        if self.with_directory {
            peer.directory_url = Some(params.url.clone());
        }
        let session = connector.create(peer)?;

        let adapter = MeshAdapter::new(
            MeshAdapterConfig {
                label: self.protocol,
                self_address: params.identity.address.clone(),
                // island meshes learn their island from the directory
                island: if self.with_directory {
                    None
                } else {
                    params.island_id.clone()
                },
                comm_radius: params.comm_radius,
                connect_timeout: params.connect_timeout,
            },
            session,
            Arc::clone(&params.position_reader),
        );
        Ok(packet_room(params, Arc::new(adapter)))
    }
}

struct SimulatorTransport;

impl TransportConstructor for SimulatorTransport {
    fn protocol(&self) -> &'static str {
        "simulator"
    }
    fn kind(&self) -> TransportKind {
        TransportKind::Synthetic
    }
    fn build(&self, params: &TransportParams) -> Result<Arc<dyn RoomConnection>> {
        let sim = SimulatorParams::from_query(&params.url)?;
        Ok(Arc::new(SimulationRoom::new(
            sim,
            params.identity.address.clone(),
            Arc::clone(&params.position_reader),
            Arc::clone(&params.metrics),
        )))
    }
}

/// Registry of tagged constructors keyed by protocol name.
#[derive(Default)]
pub struct TransportRegistry {
    constructors: DashMap<&'static str, Arc<dyn TransportConstructor>>,
}

impl TransportRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            constructors: DashMap::new(),
        }
    }

    /// Registry with every built-in protocol.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(OfflineTransport));
        registry.register(Arc::new(WsRoomTransport));
        registry.register(Arc::new(LivekitTransport));
        registry.register(Arc::new(MeshTransportCtor {
            protocol: "p2p",
            with_directory: false,
        }));
        registry.register(Arc::new(MeshTransportCtor {
            protocol: "lighthouse",
            with_directory: true,
        }));
        registry.register(Arc::new(SimulatorTransport));
        registry
    }

    /// Replaces any constructor already registered for the protocol.
    pub fn register(&self, ctor: Arc<dyn TransportConstructor>) {
        self.constructors.insert(ctor.protocol(), ctor);
    }

    pub fn protocols(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = self.constructors.iter().map(|e| *e.key()).collect();
        out.sort_unstable();
        out
    }

    pub fn get(&self, protocol: &str) -> Result<Arc<dyn TransportConstructor>> {
        self.constructors
            .get(protocol)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CommsError::UnsupportedProtocol(protocol.to_string()))
    }
}
