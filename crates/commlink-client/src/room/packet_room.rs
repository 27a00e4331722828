use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::{
    encode_message, try_decode_packet, AnnounceProfileVersion, Chat, Message, Packet, Position,
    ProfileRequest, ProfileResponse, Scene, Voice,
};

use super::RoomConnection;
use crate::dispatch::{AdapterEvent, CommsEvent, CommsEventKind, EventBus};
use crate::mesh::TopologySnapshot;
use crate::obs::CommsMetrics;
use crate::transport::{CommsAdapter, SendHints};
use crate::voice::VoiceHandler;

/// Room connection speaking the packet codec over one adapter.
pub struct PacketRoomConnection {
    inner: Arc<RoomInner>,
}

struct RoomInner {
    adapter: Arc<dyn CommsAdapter>,
    events: EventBus<CommsEvent>,
    self_address: String,
    position_index: AtomicU32,
    disposed: AtomicBool,
    metrics: Arc<CommsMetrics>,
    voice: Mutex<Option<Arc<dyn VoiceHandler>>>,
}

impl PacketRoomConnection {
    pub fn new(
        adapter: Arc<dyn CommsAdapter>,
        self_address: impl Into<String>,
        metrics: Arc<CommsMetrics>,
    ) -> Self {
        let events = EventBus::new();

        let bus = events.clone();
        let m = Arc::clone(&metrics);
        adapter
            .events()
            .subscribe_all(move |ev| route_adapter_event(&bus, &m, ev));

        Self {
            inner: Arc::new(RoomInner {
                adapter,
                events,
                self_address: self_address.into(),
                position_index: AtomicU32::new(0),
                disposed: AtomicBool::new(false),
                metrics,
                voice: Mutex::new(None),
            }),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn CommsAdapter> {
        &self.inner.adapter
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Send a prebuilt packet. Empty packets fail before reaching the wire.
    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let message = packet.message.as_ref().ok_or(CommsError::InvalidMessage)?;
        self.inner.send_message(message).await
    }
}

impl RoomInner {
    /// Sends on a disposed room are ignored; only encoding can fail.
    async fn send_message(&self, message: &Message) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            tracing::trace!(case = message.case().as_str(), "send on disposed room ignored");
            return Ok(());
        }
        let case = message.case();
        let data = encode_message(message)?;
        self.metrics.messages_out.inc(&[("case", case.as_str())]);
        self.metrics
            .bytes_out
            .add(&[("case", case.as_str())], data.len() as u64);
        self.adapter
            .send(
                data,
                SendHints {
                    reliable: case.reliable(),
                },
            )
            .await;
        Ok(())
    }
}

fn route_adapter_event(bus: &EventBus<CommsEvent>, metrics: &CommsMetrics, ev: &AdapterEvent) {
    let AdapterEvent::Message(msg) = ev else {
        if let Some(passthrough) = CommsEvent::from_adapter(ev) {
            bus.emit(passthrough);
        }
        return;
    };

    match try_decode_packet(msg.data.clone()) {
        Ok(Packet {
            message: Some(message),
        }) => {
            let case = message.case().as_str();
            metrics.messages_in.inc(&[("case", case)]);
            metrics
                .bytes_in
                .add(&[("case", case)], msg.data.len() as u64);
            bus.emit(CommsEvent::from_message(msg.address.clone(), message));
        }
        Ok(_) => {
            tracing::trace!(from = %msg.address, "packet without a known case dropped");
        }
        Err(e) => {
            metrics
                .decode_errors
                .inc(&[("code", e.code().as_str())]);
            tracing::debug!(from = %msg.address, error = %e, "dropping undecodable packet");
        }
    }
}

#[async_trait]
impl RoomConnection for PacketRoomConnection {
    fn events(&self) -> &EventBus<CommsEvent> {
        &self.inner.events
    }

    async fn connect(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(CommsError::Disposed);
        }
        self.inner.adapter.connect().await
    }

    async fn disconnect(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let voice = self.inner.voice.lock().ok().and_then(|mut v| v.take());
        if let Some(handler) = voice {
            handler.destroy().await;
        }

        let result = self.inner.adapter.disconnect(None).await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "adapter disconnect failed");
        }
        self.inner.events.clear();
        result
    }

    async fn send_position(&self, mut position: Position) -> Result<()> {
        position.index = self.inner.position_index.fetch_add(1, Ordering::Relaxed);
        self.inner.send_message(&Message::Position(position)).await
    }

    async fn send_profile_message(&self, message: AnnounceProfileVersion) -> Result<()> {
        self.inner
            .send_message(&Message::ProfileVersion(message))
            .await
    }

    async fn send_profile_request(&self, request: ProfileRequest) -> Result<()> {
        self.inner
            .send_message(&Message::ProfileRequest(request))
            .await
    }

    async fn send_profile_response(&self, response: ProfileResponse) -> Result<()> {
        self.inner
            .send_message(&Message::ProfileResponse(response))
            .await
    }

    async fn send_chat(&self, chat: Chat) -> Result<()> {
        self.inner.send_message(&Message::Chat(chat)).await
    }

    async fn send_parcel_scene_message(&self, scene: Scene) -> Result<()> {
        self.inner.send_message(&Message::Scene(scene)).await
    }

    async fn send_voice(&self, voice: Voice) -> Result<()> {
        self.inner.send_message(&Message::Voice(voice)).await
    }

    async fn voice_handler(&self) -> Result<Arc<dyn VoiceHandler>> {
        if self.is_disposed() {
            return Err(CommsError::Disposed);
        }
        if let Some(existing) = self.inner.voice.lock().ok().and_then(|v| v.clone()) {
            return Ok(existing);
        }

        let (sink, mut frames) = mpsc::unbounded_channel::<Voice>();
        let handler = self.inner.adapter.voice_handler(sink).await?;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if inner.disposed.load(Ordering::Acquire) {
                    break;
                }
                if let Err(e) = inner.send_message(&Message::Voice(frame)).await {
                    tracing::debug!(error = %e, "voice frame dropped");
                }
            }
        });

        let playback = Arc::clone(&handler);
        self.inner
            .events
            .subscribe(CommsEventKind::Position, {
                let playback = Arc::clone(&playback);
                move |ev| {
                    if let CommsEvent::Position(p) = ev {
                        playback.report_peer_position(&p.address, p.data);
                    }
                }
            });
        self.inner
            .events
            .subscribe(CommsEventKind::VoiceMessage, move |ev| {
                if let CommsEvent::VoiceMessage(v) = ev {
                    let handler = Arc::clone(&playback);
                    let address = v.address.clone();
                    let frame = v.data.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handler
                            .play_encoded_audio(&address, Position::default(), frame)
                            .await
                        {
                            tracing::debug!(from = %address, error = %e, "voice playback failed");
                        }
                    });
                }
            });

        if let Ok(mut slot) = self.inner.voice.lock() {
            *slot = Some(Arc::clone(&handler));
        }
        Ok(handler)
    }

    fn debug_topology(&self) -> TopologySnapshot {
        self.inner
            .adapter
            .debug_topology()
            .unwrap_or_else(|| TopologySnapshot::self_only(self.inner.self_address.clone()))
    }
}
