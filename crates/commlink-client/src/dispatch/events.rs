//! Event types flowing up from adapters and room connections.

use bytes::Bytes;
use serde::Serialize;

use commlink_core::protocol::{
    AnnounceProfileVersion, Chat, Message, Position, ProfileRequest, ProfileResponse, Scene, Voice,
};

use super::bus::BusEvent;

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum DisconnectReason {
    /// Local teardown (replacement or explicit disconnect).
    Requested,
    RealmFull,
    ReconnectionError,
    IdTaken,
    /// Generic failure reported by the comms server.
    ServerError,
    /// Link dropped underneath us.
    Transport(String),
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Requested => "requested",
            DisconnectReason::RealmFull => "realm-full",
            DisconnectReason::ReconnectionError => "reconnection-error",
            DisconnectReason::IdTaken => "id-taken",
            DisconnectReason::ServerError => "error",
            DisconnectReason::Transport(_) => "transport",
        }
    }

    /// Operator-facing explanation.
    pub fn message(&self) -> String {
        match self {
            DisconnectReason::Requested => "Disconnected".into(),
            DisconnectReason::RealmFull => "The realm is full, reconnecting".into(),
            DisconnectReason::ReconnectionError => "Reconnection comms error".into(),
            DisconnectReason::IdTaken => {
                "A previous connection to the connection server is still active".into()
            }
            DisconnectReason::ServerError => {
                "An error has ocurred in the communications server, reconnecting.".into()
            }
            DisconnectReason::Transport(detail) => format!("Connection lost: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectedEvent {
    /// The remote side closed us because the identity connected elsewhere.
    pub kicked: bool,
    pub reason: Option<DisconnectReason>,
}

impl DisconnectedEvent {
    pub fn requested() -> Self {
        Self {
            kicked: false,
            reason: Some(DisconnectReason::Requested),
        }
    }

    pub fn from_reason(reason: DisconnectReason) -> Self {
        Self {
            kicked: reason == DisconnectReason::IdTaken,
            reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    pub address: String,
}

impl PeerEvent {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

/// Raw bytes from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterMessage {
    pub address: String,
    pub data: Bytes,
}

/// Events emitted by a transport adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Message(AdapterMessage),
    PeerConnected(PeerEvent),
    PeerDisconnected(PeerEvent),
    PeerLinked(PeerEvent),
    PeerUnlinked(PeerEvent),
    Disconnection(DisconnectedEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterEventKind {
    Message,
    PeerConnected,
    PeerDisconnected,
    PeerLinked,
    PeerUnlinked,
    Disconnection,
}

impl BusEvent for AdapterEvent {
    type Kind = AdapterEventKind;

    fn kind(&self) -> AdapterEventKind {
        match self {
            AdapterEvent::Message(_) => AdapterEventKind::Message,
            AdapterEvent::PeerConnected(_) => AdapterEventKind::PeerConnected,
            AdapterEvent::PeerDisconnected(_) => AdapterEventKind::PeerDisconnected,
            AdapterEvent::PeerLinked(_) => AdapterEventKind::PeerLinked,
            AdapterEvent::PeerUnlinked(_) => AdapterEventKind::PeerUnlinked,
            AdapterEvent::Disconnection(_) => AdapterEventKind::Disconnection,
        }
    }
}

/// Typed payload plus the address of its sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Package<T> {
    pub address: String,
    pub data: T,
}

/// Events surfaced by a room connection.
#[derive(Debug, Clone, PartialEq)]
pub enum CommsEvent {
    Position(Package<Position>),
    ProfileMessage(Package<AnnounceProfileVersion>),
    ProfileRequest(Package<ProfileRequest>),
    ProfileResponse(Package<ProfileResponse>),
    ChatMessage(Package<Chat>),
    SceneMessageBus(Package<Scene>),
    VoiceMessage(Package<Voice>),
    PeerConnected(PeerEvent),
    PeerDisconnected(PeerEvent),
    PeerLinked(PeerEvent),
    PeerUnlinked(PeerEvent),
    Disconnection(DisconnectedEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommsEventKind {
    Position,
    ProfileMessage,
    ProfileRequest,
    ProfileResponse,
    ChatMessage,
    SceneMessageBus,
    VoiceMessage,
    PeerConnected,
    PeerDisconnected,
    PeerLinked,
    PeerUnlinked,
    Disconnection,
}

impl CommsEventKind {
    /// Public event name.
    pub fn as_str(self) -> &'static str {
        match self {
            CommsEventKind::Position => "position",
            CommsEventKind::ProfileMessage => "profileMessage",
            CommsEventKind::ProfileRequest => "profileRequest",
            CommsEventKind::ProfileResponse => "profileResponse",
            CommsEventKind::ChatMessage => "chatMessage",
            CommsEventKind::SceneMessageBus => "sceneMessageBus",
            CommsEventKind::VoiceMessage => "voiceMessage",
            CommsEventKind::PeerConnected => "PEER_CONNECTED",
            CommsEventKind::PeerDisconnected => "PEER_DISCONNECTED",
            CommsEventKind::PeerLinked => "PEER_LINKED",
            CommsEventKind::PeerUnlinked => "PEER_UNLINKED",
            CommsEventKind::Disconnection => "DISCONNECTION",
        }
    }
}

impl BusEvent for CommsEvent {
    type Kind = CommsEventKind;

    fn kind(&self) -> CommsEventKind {
        match self {
            CommsEvent::Position(_) => CommsEventKind::Position,
            CommsEvent::ProfileMessage(_) => CommsEventKind::ProfileMessage,
            CommsEvent::ProfileRequest(_) => CommsEventKind::ProfileRequest,
            CommsEvent::ProfileResponse(_) => CommsEventKind::ProfileResponse,
            CommsEvent::ChatMessage(_) => CommsEventKind::ChatMessage,
            CommsEvent::SceneMessageBus(_) => CommsEventKind::SceneMessageBus,
            CommsEvent::VoiceMessage(_) => CommsEventKind::VoiceMessage,
            CommsEvent::PeerConnected(_) => CommsEventKind::PeerConnected,
            CommsEvent::PeerDisconnected(_) => CommsEventKind::PeerDisconnected,
            CommsEvent::PeerLinked(_) => CommsEventKind::PeerLinked,
            CommsEvent::PeerUnlinked(_) => CommsEventKind::PeerUnlinked,
            CommsEvent::Disconnection(_) => CommsEventKind::Disconnection,
        }
    }
}

impl CommsEvent {
    /// Wrap a decoded message from `address`.
    pub fn from_message(address: String, message: Message) -> Self {
        match message {
            Message::Position(data) => CommsEvent::Position(Package { address, data }),
            Message::ProfileVersion(data) => CommsEvent::ProfileMessage(Package { address, data }),
            Message::ProfileRequest(data) => CommsEvent::ProfileRequest(Package { address, data }),
            Message::ProfileResponse(data) => {
                CommsEvent::ProfileResponse(Package { address, data })
            }
            Message::Chat(data) => CommsEvent::ChatMessage(Package { address, data }),
            Message::Scene(data) => CommsEvent::SceneMessageBus(Package { address, data }),
            Message::Voice(data) => CommsEvent::VoiceMessage(Package { address, data }),
        }
    }

    /// Pass-through of non-message adapter events.
    pub fn from_adapter(event: &AdapterEvent) -> Option<Self> {
        match event {
            AdapterEvent::Message(_) => None,
            AdapterEvent::PeerConnected(p) => Some(CommsEvent::PeerConnected(p.clone())),
            AdapterEvent::PeerDisconnected(p) => Some(CommsEvent::PeerDisconnected(p.clone())),
            AdapterEvent::PeerLinked(p) => Some(CommsEvent::PeerLinked(p.clone())),
            AdapterEvent::PeerUnlinked(p) => Some(CommsEvent::PeerUnlinked(p.clone())),
            AdapterEvent::Disconnection(d) => Some(CommsEvent::Disconnection(d.clone())),
        }
    }
}
