//! Adapter over a point-to-server link (direct socket room or SFU room).
//!
//! The physical link is opened by an injected [`LinkConnector`]; this adapter
//! pumps its inbound events onto the bus and owns teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use commlink_core::error::{CommsError, Result};

use super::{CommsAdapter, SendHints};
use crate::context::CommsIdentity;
use crate::dispatch::{
    AdapterEvent, AdapterMessage, DisconnectReason, DisconnectedEvent, EventBus, PeerEvent,
};
use crate::voice::{BasicVoiceHandler, VoiceFrameSink, VoiceHandler};

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEndpoint {
    pub url: String,
    /// Access token for SFU rooms.
    pub token: Option<String>,
    pub identity: CommsIdentity,
}

/// Inbound traffic of an open link.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Message { address: String, data: Bytes },
    PeerJoined(String),
    PeerLeft(String),
    /// The remote side closed the link.
    Closed {
        kicked: bool,
        reason: Option<DisconnectReason>,
    },
}

#[async_trait]
pub trait LinkSender: Send + Sync {
    fn send(&self, data: Bytes, hints: SendHints) -> Result<()>;
    async fn close(&self);
}

pub struct LinkSession {
    pub sender: Arc<dyn LinkSender>,
    pub inbound: mpsc::Receiver<LinkEvent>,
}

/// Opens physical links. Implemented outside this crate.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    async fn open(&self, endpoint: &LinkEndpoint) -> Result<LinkSession>;

    /// Native voice pipeline, if the link has one.
    fn voice_handler(&self, _sink: VoiceFrameSink) -> Option<Arc<dyn VoiceHandler>> {
        None
    }
}

pub struct LinkAdapter {
    label: &'static str,
    endpoint: LinkEndpoint,
    connector: Arc<dyn LinkConnector>,
    events: EventBus<AdapterEvent>,
    disposed: Arc<AtomicBool>,
    link: Mutex<LinkState>,
}

#[derive(Default)]
struct LinkState {
    sender: Option<Arc<dyn LinkSender>>,
    pump: Option<JoinHandle<()>>,
}

impl LinkAdapter {
    /// `label` names the transport in logs (`ws-room`, `livekit`).
    pub fn new(
        label: &'static str,
        endpoint: LinkEndpoint,
        connector: Arc<dyn LinkConnector>,
    ) -> Self {
        Self {
            label,
            endpoint,
            connector,
            events: EventBus::new(),
            disposed: Arc::new(AtomicBool::new(false)),
            link: Mutex::new(LinkState::default()),
        }
    }

    pub fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    fn sender(&self) -> Option<Arc<dyn LinkSender>> {
        self.link.lock().ok().and_then(|s| s.sender.clone())
    }

    fn take_link(&self) -> LinkState {
        self.link
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }
}

async fn pump(
    label: &'static str,
    events: EventBus<AdapterEvent>,
    disposed: Arc<AtomicBool>,
    mut inbound: mpsc::Receiver<LinkEvent>,
) {
    let closed = loop {
        let Some(ev) = inbound.recv().await else {
            break DisconnectedEvent::from_reason(DisconnectReason::Transport("link closed".into()));
        };
        if disposed.load(Ordering::Acquire) {
            return;
        }
        match ev {
            LinkEvent::Message { address, data } => {
                events.emit(AdapterEvent::Message(AdapterMessage { address, data }));
            }
            LinkEvent::PeerJoined(address) => {
                events.emit(AdapterEvent::PeerConnected(PeerEvent::new(address)));
            }
            LinkEvent::PeerLeft(address) => {
                events.emit(AdapterEvent::PeerDisconnected(PeerEvent::new(address)));
            }
            LinkEvent::Closed { kicked, reason } => break DisconnectedEvent { kicked, reason },
        }
    };

    if !disposed.swap(true, Ordering::AcqRel) {
        tracing::warn!(
            transport = label,
            kicked = closed.kicked,
            reason = closed.reason.as_ref().map(DisconnectReason::as_str).unwrap_or("none"),
            "link closed by remote"
        );
        events.emit(AdapterEvent::Disconnection(closed));
        events.clear();
    }
}

#[async_trait]
impl CommsAdapter for LinkAdapter {
    fn events(&self) -> &EventBus<AdapterEvent> {
        &self.events
    }

    async fn connect(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(CommsError::Disposed);
        }

        let LinkSession { sender, inbound } = self.connector.open(&self.endpoint).await?;

        // Checked under the lock so a disconnect racing the open either sees
        // the stored link or is seen here; the link is never resurrected.
        let refused = match self.link.lock() {
            Ok(mut s) if !self.disposed.load(Ordering::Acquire) => {
                s.pump = Some(tokio::spawn(pump(
                    self.label,
                    self.events.clone(),
                    Arc::clone(&self.disposed),
                    inbound,
                )));
                s.sender = Some(Arc::clone(&sender));
                None
            }
            Ok(_) => Some(CommsError::Disposed),
            Err(_) => Some(CommsError::Internal("link state poisoned".into())),
        };
        if let Some(e) = refused {
            sender.close().await;
            return Err(e);
        }

        tracing::info!(transport = self.label, url = %self.endpoint.url, "link connected");
        Ok(())
    }

    async fn send(&self, data: Bytes, hints: SendHints) {
        if self.disposed.load(Ordering::Acquire) {
            tracing::trace!(transport = self.label, "send on disposed link ignored");
            return;
        }
        let Some(sender) = self.sender() else {
            tracing::trace!(transport = self.label, "send before connect dropped");
            return;
        };
        if let Err(e) = sender.send(data, hints) {
            tracing::warn!(transport = self.label, error = %e, "link send failed");
        }
    }

    async fn disconnect(&self, reason: Option<DisconnectReason>) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let link = self.take_link();
        if let Some(pump) = link.pump {
            pump.abort();
        }
        if let Some(sender) = link.sender {
            sender.close().await;
        }

        let event = match reason {
            Some(r) => DisconnectedEvent::from_reason(r),
            None => DisconnectedEvent::requested(),
        };
        tracing::info!(transport = self.label, "link disconnected");
        self.events.emit(AdapterEvent::Disconnection(event));
        self.events.clear();
        Ok(())
    }

    async fn voice_handler(&self, sink: VoiceFrameSink) -> Result<Arc<dyn VoiceHandler>> {
        match self.connector.voice_handler(sink.clone()) {
            Some(handler) => Ok(handler),
            None => Ok(Arc::new(BasicVoiceHandler::new(sink))),
        }
    }
}
