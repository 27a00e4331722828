//! Packet data model.
//!
//! A [`Packet`] carries at most one [`Message`]. `Packet { message: None }` is
//! what the decoder returns for unknown or unreadable input; it can never be
//! encoded.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Position sample of a participant.
///
/// `index` is a per-sender monotonically increasing counter. Receivers use it
/// to discard out-of-order updates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub index: u32,
    pub position_x: f32,
    pub position_y: f32,
    pub position_z: f32,
    pub rotation_x: f32,
    pub rotation_y: f32,
    pub rotation_z: f32,
    pub rotation_w: f32,
}

impl Position {
    /// Position with identity rotation.
    pub fn at(x: f32, y: f32, z: f32) -> Self {
        Self {
            index: 0,
            position_x: x,
            position_y: y,
            position_z: z,
            rotation_x: 0.0,
            rotation_y: 0.0,
            rotation_z: 0.0,
            rotation_w: 1.0,
        }
    }

    /// Same pose, ignoring the sequence index.
    pub fn same_pose(&self, other: &Position) -> bool {
        Position { index: 0, ..*self } == Position { index: 0, ..*other }
    }
}

/// Broadcast of the sender's current profile version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnnounceProfileVersion {
    pub profile_version: u32,
}

/// Ask `address` for its profile if it is newer than `profile_version`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileRequest {
    pub address: String,
    pub profile_version: u32,
}

/// Serialized profile JSON plus the content server it references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfileResponse {
    pub serialized_profile: String,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chat {
    pub message: String,
    /// Milliseconds since the unix epoch, as stamped by the sender.
    pub timestamp: f64,
}

/// Scene event; `data` is opaque to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Scene {
    pub scene_id: String,
    pub data: Bytes,
}

/// Codec tag of an encoded voice frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VoiceCodec {
    #[default]
    Opus,
    /// Tag written by a newer sender.
    Unknown(u8),
}

impl VoiceCodec {
    pub fn tag(self) -> u8 {
        match self {
            VoiceCodec::Opus => 0,
            VoiceCodec::Unknown(t) => t,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => VoiceCodec::Opus,
            t => VoiceCodec::Unknown(t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Voice {
    pub encoded_samples: Bytes,
    pub index: u32,
    pub codec: VoiceCodec,
}

/// Case discriminant, also the on-wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketCase {
    Position,
    ProfileVersion,
    ProfileRequest,
    ProfileResponse,
    Chat,
    Scene,
    Voice,
}

impl PacketCase {
    pub const ALL: [PacketCase; 7] = [
        PacketCase::Position,
        PacketCase::ProfileVersion,
        PacketCase::ProfileRequest,
        PacketCase::ProfileResponse,
        PacketCase::Chat,
        PacketCase::Scene,
        PacketCase::Voice,
    ];

    pub fn tag(self) -> u8 {
        match self {
            PacketCase::Position => 1,
            PacketCase::ProfileVersion => 2,
            PacketCase::ProfileRequest => 3,
            PacketCase::ProfileResponse => 4,
            PacketCase::Chat => 5,
            PacketCase::Scene => 6,
            PacketCase::Voice => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        PacketCase::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// Name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            PacketCase::Position => "position",
            PacketCase::ProfileVersion => "profileVersion",
            PacketCase::ProfileRequest => "profileRequest",
            PacketCase::ProfileResponse => "profileResponse",
            PacketCase::Chat => "chat",
            PacketCase::Scene => "scene",
            PacketCase::Voice => "voice",
        }
    }

    /// Delivery guarantee each case needs from the transport.
    pub fn reliable(self) -> bool {
        match self {
            PacketCase::Position | PacketCase::Voice => false,
            PacketCase::ProfileVersion
            | PacketCase::ProfileRequest
            | PacketCase::ProfileResponse
            | PacketCase::Chat
            | PacketCase::Scene => true,
        }
    }
}

/// Exactly one populated case.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Position(Position),
    ProfileVersion(AnnounceProfileVersion),
    ProfileRequest(ProfileRequest),
    ProfileResponse(ProfileResponse),
    Chat(Chat),
    Scene(Scene),
    Voice(Voice),
}

impl Message {
    pub fn case(&self) -> PacketCase {
        match self {
            Message::Position(_) => PacketCase::Position,
            Message::ProfileVersion(_) => PacketCase::ProfileVersion,
            Message::ProfileRequest(_) => PacketCase::ProfileRequest,
            Message::ProfileResponse(_) => PacketCase::ProfileResponse,
            Message::Chat(_) => PacketCase::Chat,
            Message::Scene(_) => PacketCase::Scene,
            Message::Voice(_) => PacketCase::Voice,
        }
    }
}

/// Unit that crosses the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Packet {
    pub message: Option<Message>,
}

impl Packet {
    pub fn new(message: Message) -> Self {
        Self {
            message: Some(message),
        }
    }

    /// The "no message" sentinel.
    pub fn empty() -> Self {
        Self { message: None }
    }

    pub fn case(&self) -> Option<PacketCase> {
        self.message.as_ref().map(Message::case)
    }

    pub fn is_empty(&self) -> bool {
        self.message.is_none()
    }
}

impl From<Message> for Packet {
    fn from(message: Message) -> Self {
        Packet::new(message)
    }
}
