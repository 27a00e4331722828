//! Adapter over a mesh transport (plain peer mesh or island mesh).
//!
//! Outgoing packets are wrapped in a [`MeshFrame`] and routed to a topic by
//! packet case: scene traffic to the island, everything else to the cell of
//! the current position. Every position send and island change re-runs topic
//! reconciliation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::{peek_case, try_decode_packet, Message, PacketCase, Position};

use super::frame::{decode_frame, encode_frame, MeshFrame};
use super::partition::{position_hash, position_to_parcel, topics_for, Parcel};
use super::peers::PeerIdentityMap;
use super::reconcile::{ReconcileReport, RoomReconciler};
use super::topology::{build_topology, TopologySnapshot};
use super::{MeshEvent, MeshMessageType, MeshSession, MeshStatus, MeshTransport, ROOM_NOT_JOINED};
use crate::context::PositionReader;
use crate::dispatch::{
    AdapterEvent, AdapterMessage, DisconnectReason, DisconnectedEvent, EventBus, PeerEvent,
};
use crate::transport::{CommsAdapter, SendHints};
use crate::voice::{BasicVoiceHandler, VoiceFrameSink, VoiceHandler};

/// Chat ids remembered per sender for de-duplication.
const CHAT_HISTORY: usize = 64;

#[derive(Debug, Clone)]
pub struct MeshAdapterConfig {
    /// Transport name for logs (`p2p`, `lighthouse`).
    pub label: &'static str,
    pub self_address: String,
    /// Island known up front; island meshes learn it from the directory.
    pub island: Option<String>,
    pub comm_radius: i32,
    pub connect_timeout: Duration,
}

pub struct MeshAdapter {
    inner: Arc<MeshInner>,
}

struct MeshInner {
    cfg: MeshAdapterConfig,
    transport: Arc<dyn MeshTransport>,
    events: EventBus<AdapterEvent>,
    position: PositionReader,
    reconciler: RoomReconciler,
    peers: PeerIdentityMap,
    island: Mutex<Option<String>>,
    last_parcel: Mutex<Option<Parcel>>,
    chat_seq: AtomicU64,
    seen_chats: Mutex<HashMap<String, VecDeque<u64>>>,
    disposed: AtomicBool,
    inbound: Mutex<Option<mpsc::Receiver<MeshEvent>>>,
    shutdown: watch::Sender<bool>,
}

impl MeshAdapter {
    pub fn new(cfg: MeshAdapterConfig, session: MeshSession, position: PositionReader) -> Self {
        let (shutdown, _) = watch::channel(false);
        let island = cfg.island.clone();
        Self {
            inner: Arc::new(MeshInner {
                cfg,
                transport: session.transport,
                events: EventBus::new(),
                position,
                reconciler: RoomReconciler::new(),
                peers: PeerIdentityMap::new(),
                island: Mutex::new(island),
                last_parcel: Mutex::new(None),
                chat_seq: AtomicU64::new(0),
                seen_chats: Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
                inbound: Mutex::new(Some(session.events)),
                shutdown,
            }),
        }
    }

    pub fn island(&self) -> Option<String> {
        self.inner.island()
    }

    pub fn peers(&self) -> &PeerIdentityMap {
        &self.inner.peers
    }

    /// Recompute topics from the current position and island.
    pub async fn refresh_topics(&self) -> ReconcileReport {
        self.inner.refresh(true).await
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Map an establishment failure to the reason reported on disconnect.
fn establish_failure(e: CommsError) -> (CommsError, DisconnectReason) {
    match e {
        CommsError::RealmFull => (CommsError::RealmFull, DisconnectReason::RealmFull),
        CommsError::Transport { ref status, .. } if status == "layer_is_full" => {
            (CommsError::RealmFull, DisconnectReason::RealmFull)
        }
        CommsError::IdTaken => (CommsError::IdTaken, DisconnectReason::IdTaken),
        other => (other, DisconnectReason::ServerError),
    }
}

impl MeshInner {
    fn island(&self) -> Option<String> {
        self.island.lock().ok().and_then(|i| i.clone())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    async fn refresh(&self, force: bool) -> ReconcileReport {
        if self.is_disposed() {
            return ReconcileReport::default();
        }
        let position = (self.position)();
        let parcel = position_to_parcel(&position);
        let moved = match self.last_parcel.lock() {
            Ok(mut last) => {
                let moved = *last != Some(parcel);
                *last = Some(parcel);
                moved
            }
            Err(_) => true,
        };
        if !force && !moved {
            return ReconcileReport::default();
        }

        let island = self.island();
        let desired = topics_for(&position, self.cfg.comm_radius, island.as_deref());
        self.reconciler
            .reconcile(self.transport.as_ref(), desired)
            .await
    }

    /// Returns false for a chat id already seen from this sender.
    fn remember_chat(&self, address: &str, id: u64) -> bool {
        let Ok(mut seen) = self.seen_chats.lock() else {
            return true;
        };
        let history = seen.entry(address.to_string()).or_default();
        if history.contains(&id) {
            return false;
        }
        history.push_back(id);
        if history.len() > CHAT_HISTORY {
            history.pop_front();
        }
        true
    }

    fn forget_chats(&self, address: &str) {
        if let Ok(mut seen) = self.seen_chats.lock() {
            seen.remove(address);
        }
    }

    async fn shutdown(&self, reason: Option<DisconnectReason>) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        self.transport.dispose().await;

        let event = match reason {
            Some(DisconnectReason::Requested) | None => {
                tracing::info!(transport = self.cfg.label, "mesh disconnected");
                DisconnectedEvent::requested()
            }
            Some(r) => {
                tracing::warn!(
                    transport = self.cfg.label,
                    reason = r.as_str(),
                    message = %r.message(),
                    "mesh disconnected"
                );
                DisconnectedEvent::from_reason(r)
            }
        };
        self.events.emit(AdapterEvent::Disconnection(event));
        self.events.clear();
    }

    async fn handle(&self, event: MeshEvent) {
        if self.is_disposed() {
            return;
        }
        match event {
            MeshEvent::Packet {
                sender,
                room,
                payload,
            } => self.on_packet(&sender, &room, payload),
            MeshEvent::IslandChanged { island, peers } => {
                tracing::info!(transport = self.cfg.label, island = %island, "island changed");
                if let Ok(mut current) = self.island.lock() {
                    *current = Some(island);
                }
                for p in &peers {
                    if let Some(pos) = p.position {
                        self.transport.set_peer_position(&p.id, pos);
                    }
                }
                let ids: Vec<String> = peers.into_iter().map(|p| p.id).collect();
                for address in self.peers.remove_all_but(&ids) {
                    self.forget_chats(&address);
                    self.events
                        .emit(AdapterEvent::PeerDisconnected(PeerEvent::new(address)));
                }
                self.refresh(true).await;
            }
            MeshEvent::PeerLeftIsland(id) => {
                if let Some(address) = self.peers.forget(&id) {
                    self.forget_chats(&address);
                    self.events
                        .emit(AdapterEvent::PeerDisconnected(PeerEvent::new(address)));
                }
            }
            MeshEvent::PeerLinked(id) => {
                let address = self.peers.resolve(&id);
                self.events
                    .emit(AdapterEvent::PeerLinked(PeerEvent::new(address)));
            }
            MeshEvent::PeerUnlinked(id) => {
                let address = self.peers.resolve(&id);
                self.events
                    .emit(AdapterEvent::PeerUnlinked(PeerEvent::new(address)));
            }
            MeshEvent::Status(status) => match status {
                MeshStatus::Connecting | MeshStatus::Connected => {
                    tracing::info!(transport = self.cfg.label, status = status.as_str(), "mesh status");
                }
                MeshStatus::RealmFull => self.shutdown(Some(DisconnectReason::RealmFull)).await,
                MeshStatus::ReconnectionError => {
                    self.shutdown(Some(DisconnectReason::ReconnectionError)).await
                }
                MeshStatus::IdTaken => self.shutdown(Some(DisconnectReason::IdTaken)).await,
                MeshStatus::Error => self.shutdown(Some(DisconnectReason::ServerError)).await,
            },
        }
    }

    fn on_packet(&self, sender: &str, room: &str, payload: Bytes) {
        let frame = match decode_frame(payload) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!(from = sender, room, error = %e, "dropping undecodable mesh frame");
                return;
            }
        };

        let address = if frame.sender.is_empty() {
            self.peers.resolve(sender)
        } else {
            if self.peers.identify(sender, &frame.sender) {
                self.events
                    .emit(AdapterEvent::PeerConnected(PeerEvent::new(frame.sender.clone())));
            }
            frame.sender.clone()
        };

        match peek_case(&frame.packet) {
            Some(PacketCase::Chat) => {
                if let Some(id) = frame.chat_id {
                    if !self.remember_chat(&address, id) {
                        tracing::trace!(from = %address, id, "duplicate chat dropped");
                        return;
                    }
                }
            }
            Some(PacketCase::Position) => {
                if let Some(p) = decoded_position(&frame.packet) {
                    self.transport
                        .set_peer_position(sender, [p.position_x, p.position_y, p.position_z]);
                }
            }
            _ => {}
        }

        self.events.emit(AdapterEvent::Message(AdapterMessage {
            address,
            data: frame.packet,
        }));
    }
}

fn decoded_position(packet: &Bytes) -> Option<Position> {
    match try_decode_packet(packet.clone()).ok()?.message? {
        Message::Position(p) => Some(p),
        _ => None,
    }
}

async fn pump(
    inner: Arc<MeshInner>,
    mut inbound: mpsc::Receiver<MeshEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    if *shutdown.borrow_and_update() {
        return;
    }
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            ev = inbound.recv() => match ev {
                Some(ev) => inner.handle(ev).await,
                None => {
                    inner
                        .shutdown(Some(DisconnectReason::Transport("mesh closed".into())))
                        .await;
                    break;
                }
            },
        }
    }
}

#[async_trait]
impl CommsAdapter for MeshAdapter {
    fn events(&self) -> &EventBus<AdapterEvent> {
        &self.inner.events
    }

    async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.is_disposed() {
            return Err(CommsError::Disposed);
        }
        let inbound = inner
            .inbound
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or_else(|| CommsError::Internal("mesh adapter already connected".into()))?;
        tokio::spawn(pump(Arc::clone(inner), inbound, inner.shutdown.subscribe()));

        if inner.transport.connected_count() == 0 {
            if let Err(e) = inner.transport.establish(inner.cfg.connect_timeout).await {
                let (err, reason) = establish_failure(e);
                tracing::warn!(transport = inner.cfg.label, error = %err, "mesh establishment failed");
                inner.shutdown(Some(reason)).await;
                return Err(err);
            }
        }

        if inner.is_disposed() {
            return Err(CommsError::Disposed);
        }

        tracing::info!(
            transport = inner.cfg.label,
            island = inner.island().as_deref().unwrap_or(""),
            peers = inner.transport.connected_count(),
            "mesh connected"
        );
        inner.refresh(true).await;
        Ok(())
    }

    async fn send(&self, data: Bytes, hints: SendHints) {
        let inner = &self.inner;
        if inner.is_disposed() {
            tracing::trace!(transport = inner.cfg.label, "send on disposed mesh ignored");
            return;
        }

        let case = peek_case(&data);
        let position = match case {
            Some(PacketCase::Position) => {
                decoded_position(&data).unwrap_or_else(|| (inner.position)())
            }
            _ => (inner.position)(),
        };

        let (topic, ty) = match case {
            Some(PacketCase::Scene) => match inner.island() {
                Some(island) => (island, MeshMessageType::scene()),
                None => {
                    tracing::trace!("scene message dropped: no island assigned");
                    return;
                }
            },
            Some(PacketCase::Voice) => (position_hash(&position), MeshMessageType::voice()),
            Some(PacketCase::ProfileRequest) => (
                position_hash(&position),
                MeshMessageType::profile("profile_request"),
            ),
            Some(PacketCase::ProfileResponse) => (
                position_hash(&position),
                MeshMessageType::profile("profile_response"),
            ),
            Some(PacketCase::Chat) => (position_hash(&position), MeshMessageType::reliable("chat")),
            Some(PacketCase::ProfileVersion) => {
                (position_hash(&position), MeshMessageType::unreliable("profile"))
            }
            Some(PacketCase::Position) => {
                (position_hash(&position), MeshMessageType::unreliable("position"))
            }
            None if hints.reliable => {
                (position_hash(&position), MeshMessageType::reliable("message"))
            }
            None => (position_hash(&position), MeshMessageType::unreliable("message")),
        };

        let chat_id = (case == Some(PacketCase::Chat))
            .then(|| inner.chat_seq.fetch_add(1, Ordering::Relaxed) + 1);
        let frame = match encode_frame(&MeshFrame {
            sender: inner.cfg.self_address.clone(),
            timestamp_ms: now_ms(),
            chat_id,
            packet: data,
        }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(transport = inner.cfg.label, error = %e, "mesh frame not encodable");
                return;
            }
        };

        match inner.transport.send(&topic, frame, &ty).await {
            Ok(()) => {}
            Err(CommsError::Transport { status, .. }) if status == ROOM_NOT_JOINED => {
                tracing::trace!(topic = %topic, "send to unjoined topic ignored");
            }
            Err(e) => {
                tracing::warn!(transport = inner.cfg.label, topic = %topic, error = %e, "mesh send failed");
            }
        }

        if case == Some(PacketCase::Position) {
            inner.refresh(false).await;
        }
    }

    async fn disconnect(&self, reason: Option<DisconnectReason>) -> Result<()> {
        self.inner.shutdown(reason).await;
        Ok(())
    }

    async fn voice_handler(&self, sink: VoiceFrameSink) -> Result<Arc<dyn VoiceHandler>> {
        Ok(Arc::new(BasicVoiceHandler::new(sink)))
    }

    fn debug_topology(&self) -> Option<TopologySnapshot> {
        let inner = &self.inner;
        Some(build_topology(
            &inner.cfg.self_address,
            &inner.transport.fully_connected_peer_ids(),
            &inner.transport.known_peers(),
            &inner.peers,
        ))
    }
}
