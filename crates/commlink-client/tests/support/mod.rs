//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use commlink_client::dispatch::{
    AdapterEvent, AdapterMessage, CommsEvent, DisconnectReason, DisconnectedEvent, EventBus,
};
use commlink_client::mesh::{
    KnownPeer, MeshConnector, MeshEvent, MeshMessageType, MeshPeerConfig, MeshSession,
    MeshTransport, TopologySnapshot, ROOM_NOT_JOINED,
};
use commlink_client::room::RoomConnection;
use commlink_client::transport::{
    CommsAdapter, LinkConnector, LinkEndpoint, LinkEvent, LinkSender, LinkSession, SendHints,
    TransportConstructor, TransportKind, TransportParams,
};
use commlink_client::voice::{BasicVoiceHandler, VoiceFrameSink, VoiceHandler};
use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::{
    decode_packet, AnnounceProfileVersion, Chat, Message, Position, ProfileRequest,
    ProfileResponse, Scene, Voice,
};

pub const SELF: &str = "0xself";

/// Adapter that records sends and lets tests inject inbound traffic.
#[derive(Default)]
pub struct RecordingAdapter {
    pub events: EventBus<AdapterEvent>,
    pub sent: Mutex<Vec<(Bytes, SendHints)>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    disposed: AtomicBool,
}

impl RecordingAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inject(&self, address: &str, data: Bytes) {
        self.events.emit(AdapterEvent::Message(AdapterMessage {
            address: address.to_string(),
            data,
        }));
    }

    pub fn sent_messages(&self) -> Vec<(Message, SendHints)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(b, h)| (decode_packet(b.clone()).message.unwrap(), *h))
            .collect()
    }
}

#[async_trait]
impl CommsAdapter for RecordingAdapter {
    fn events(&self) -> &EventBus<AdapterEvent> {
        &self.events
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, data: Bytes, hints: SendHints) {
        if !self.disposed.load(Ordering::SeqCst) {
            self.sent.lock().unwrap().push((data, hints));
        }
    }

    async fn disconnect(&self, reason: Option<DisconnectReason>) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let event = reason
            .map(DisconnectedEvent::from_reason)
            .unwrap_or_else(DisconnectedEvent::requested);
        self.events.emit(AdapterEvent::Disconnection(event));
        self.events.clear();
        Ok(())
    }

    async fn voice_handler(&self, sink: VoiceFrameSink) -> Result<Arc<dyn VoiceHandler>> {
        Ok(Arc::new(BasicVoiceHandler::new(sink)))
    }
}

/// Mesh transport keeping joined topics and sends in memory.
#[derive(Default)]
pub struct FakeMesh {
    pub rooms: Mutex<BTreeSet<String>>,
    pub joins: Mutex<Vec<String>>,
    pub leaves: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<(String, Bytes, MeshMessageType)>>,
    pub peer_positions: Mutex<Vec<(String, [f32; 3])>>,
    pub direct: Mutex<Vec<String>>,
    pub known: Mutex<Vec<KnownPeer>>,
    pub connected: AtomicUsize,
    pub establish_error: Mutex<Option<CommsError>>,
    pub establish_delay: Mutex<Option<Duration>>,
    pub disposed: AtomicBool,
    /// Delay inside join/leave to widen race windows.
    pub op_delay: Mutex<Option<Duration>>,
}

impl FakeMesh {
    pub fn joined(&self) -> Vec<String> {
        self.rooms.lock().unwrap().iter().cloned().collect()
    }

    pub fn sent_topics(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _, _)| t.clone()).collect()
    }

    async fn pause(&self) {
        let delay = *self.op_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl MeshTransport for FakeMesh {
    async fn establish(&self, _timeout: Duration) -> Result<()> {
        let delay = *self.establish_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if let Some(e) = self.establish_error.lock().unwrap().take() {
            return Err(e);
        }
        self.connected.store(1, Ordering::SeqCst);
        Ok(())
    }

    fn connected_count(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    async fn join_room(&self, topic: &str) -> Result<()> {
        self.pause().await;
        self.joins.lock().unwrap().push(topic.to_string());
        self.rooms.lock().unwrap().insert(topic.to_string());
        Ok(())
    }

    async fn leave_room(&self, topic: &str) -> Result<()> {
        self.pause().await;
        self.leaves.lock().unwrap().push(topic.to_string());
        self.rooms.lock().unwrap().remove(topic);
        Ok(())
    }

    fn current_rooms(&self) -> Vec<String> {
        self.joined()
    }

    async fn send(&self, topic: &str, payload: Bytes, ty: &MeshMessageType) -> Result<()> {
        if !self.rooms.lock().unwrap().contains(topic) {
            return Err(CommsError::transport(ROOM_NOT_JOINED, topic));
        }
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, ty.clone()));
        Ok(())
    }

    fn fully_connected_peer_ids(&self) -> Vec<String> {
        self.direct.lock().unwrap().clone()
    }

    fn known_peers(&self) -> Vec<KnownPeer> {
        self.known.lock().unwrap().clone()
    }

    fn set_peer_position(&self, peer_id: &str, position: [f32; 3]) {
        self.peer_positions
            .lock()
            .unwrap()
            .push((peer_id.to_string(), position));
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Session over a fresh [`FakeMesh`] plus the sender feeding its events.
pub fn fake_mesh_session() -> (Arc<FakeMesh>, mpsc::Sender<MeshEvent>, MeshSession) {
    let mesh = Arc::new(FakeMesh::default());
    let (tx, rx) = mpsc::channel(64);
    let session = MeshSession {
        transport: mesh.clone(),
        events: rx,
    };
    (mesh, tx, session)
}

/// Connector handing out [`FakeMesh`] sessions and keeping every handle.
#[derive(Default)]
pub struct FakeMeshConnector {
    pub configs: Mutex<Vec<MeshPeerConfig>>,
    pub meshes: Mutex<Vec<(Arc<FakeMesh>, mpsc::Sender<MeshEvent>)>>,
}

impl MeshConnector for FakeMeshConnector {
    fn create(&self, config: MeshPeerConfig) -> Result<MeshSession> {
        self.configs.lock().unwrap().push(config);
        let (mesh, tx, session) = fake_mesh_session();
        self.meshes.lock().unwrap().push((mesh, tx));
        Ok(session)
    }
}

#[derive(Default)]
pub struct RecordingLinkSender {
    pub sent: Mutex<Vec<(Bytes, SendHints)>>,
    pub closes: AtomicUsize,
}

#[async_trait]
impl LinkSender for RecordingLinkSender {
    fn send(&self, data: Bytes, hints: SendHints) -> Result<()> {
        self.sent.lock().unwrap().push((data, hints));
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Link connector counting opens; each open yields a recording sender and
/// keeps the inbound sender for injection.
#[derive(Default)]
pub struct CountingLinkConnector {
    pub opens: AtomicUsize,
    pub endpoints: Mutex<Vec<LinkEndpoint>>,
    pub open_delay: Mutex<Option<Duration>>,
    pub senders: Mutex<Vec<Arc<RecordingLinkSender>>>,
    pub inbound: Mutex<Vec<mpsc::Sender<LinkEvent>>>,
}

#[async_trait]
impl LinkConnector for CountingLinkConnector {
    async fn open(&self, endpoint: &LinkEndpoint) -> Result<LinkSession> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let delay = *self.open_delay.lock().unwrap();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        let sender = Arc::new(RecordingLinkSender::default());
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().unwrap().push(sender.clone());
        self.inbound.lock().unwrap().push(tx);
        Ok(LinkSession {
            sender,
            inbound: rx,
        })
    }
}

/// How a [`MockRoom`] behaves on connect.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    pub connect_delay: Option<Duration>,
    pub fail_with_realm_full: bool,
}

/// Room connection recording every call.
pub struct MockRoom {
    pub label: String,
    pub events: EventBus<CommsEvent>,
    pub behavior: MockBehavior,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub connected: AtomicBool,
    pub sent: Mutex<Vec<Message>>,
}

impl MockRoom {
    pub fn new(label: impl Into<String>, behavior: MockBehavior) -> Self {
        Self {
            label: label.into(),
            events: EventBus::new(),
            behavior,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            connected: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn positions_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Message::Position(_)))
            .count()
    }

    pub fn profile_responses(&self) -> Vec<ProfileResponse> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                Message::ProfileResponse(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn record(&self, m: Message) -> Result<()> {
        self.sent.lock().unwrap().push(m);
        Ok(())
    }
}

#[async_trait]
impl RoomConnection for MockRoom {
    fn events(&self) -> &EventBus<CommsEvent> {
        &self.events
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.behavior.connect_delay {
            tokio::time::sleep(d).await;
        }
        if self.behavior.fail_with_realm_full {
            return Err(CommsError::RealmFull);
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_position(&self, position: Position) -> Result<()> {
        self.record(Message::Position(position))
    }

    async fn send_profile_message(&self, message: AnnounceProfileVersion) -> Result<()> {
        self.record(Message::ProfileVersion(message))
    }

    async fn send_profile_request(&self, request: ProfileRequest) -> Result<()> {
        self.record(Message::ProfileRequest(request))
    }

    async fn send_profile_response(&self, response: ProfileResponse) -> Result<()> {
        self.record(Message::ProfileResponse(response))
    }

    async fn send_chat(&self, chat: Chat) -> Result<()> {
        self.record(Message::Chat(chat))
    }

    async fn send_parcel_scene_message(&self, scene: Scene) -> Result<()> {
        self.record(Message::Scene(scene))
    }

    async fn send_voice(&self, voice: Voice) -> Result<()> {
        self.record(Message::Voice(voice))
    }

    async fn voice_handler(&self) -> Result<Arc<dyn VoiceHandler>> {
        let (sink, _rx) = mpsc::unbounded_channel();
        Ok(Arc::new(BasicVoiceHandler::new(sink)))
    }

    fn debug_topology(&self) -> TopologySnapshot {
        TopologySnapshot::self_only(SELF)
    }
}

/// Constructor registered as `protocol`; the url selects the behavior
/// (`slow`, `realm-full`, anything else connects immediately).
pub struct MockTransport {
    pub protocol: &'static str,
    pub kind: TransportKind,
    pub slow: Duration,
    pub built: Mutex<Vec<Arc<MockRoom>>>,
}

impl MockTransport {
    pub fn new(protocol: &'static str, kind: TransportKind) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            kind,
            slow: Duration::from_secs(5),
            built: Mutex::new(Vec::new()),
        })
    }

    pub fn rooms(&self) -> Vec<Arc<MockRoom>> {
        self.built.lock().unwrap().clone()
    }

    pub fn room(&self, i: usize) -> Arc<MockRoom> {
        self.rooms()[i].clone()
    }
}

impl TransportConstructor for MockTransport {
    fn protocol(&self) -> &'static str {
        self.protocol
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn build(&self, params: &TransportParams) -> Result<Arc<dyn RoomConnection>> {
        let behavior = match params.url.as_str() {
            "slow" => MockBehavior {
                connect_delay: Some(self.slow),
                ..MockBehavior::default()
            },
            "realm-full" => MockBehavior {
                fail_with_realm_full: true,
                ..MockBehavior::default()
            },
            _ => MockBehavior::default(),
        };
        let room = Arc::new(MockRoom::new(params.url.clone(), behavior));
        self.built.lock().unwrap().push(room.clone());
        Ok(room)
    }
}

/// Let spawned tasks run.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
