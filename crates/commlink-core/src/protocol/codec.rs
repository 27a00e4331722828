//! Packet codec (panic-free).
//!
//! Frame layout:
//! - `v` (u8): packet format version, currently 1
//! - `case` (u8): tag of the populated case (see [`PacketCase::tag`])
//! - body: fixed-width little-endian numbers, varint-prefixed strings/bytes
//!
//! Bodies may carry trailing bytes appended by newer senders; they are ignored.
//! Unknown case tags decode to the empty packet so older receivers keep
//! working when new cases are introduced.

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::{
    AnnounceProfileVersion, Chat, Message, Packet, PacketCase, Position, ProfileRequest,
    ProfileResponse, Scene, Voice, VoiceCodec,
};
use super::wire;
use crate::error::{CommsError, Result};

/// Current packet format version.
pub const PACKET_VERSION: u8 = 1;

/// Version byte + case byte.
pub const PACKET_HEADER_LEN: usize = 2;

/// Encoded size of a position packet.
pub const POSITION_PACKET_LEN: usize = PACKET_HEADER_LEN + 4 + 7 * 4;

/// Encode a packet. Fails with [`CommsError::InvalidMessage`] when no case is
/// populated.
pub fn encode_packet(packet: &Packet) -> Result<Bytes> {
    let message = packet.message.as_ref().ok_or(CommsError::InvalidMessage)?;
    encode_message(message)
}

/// Encode a single message case.
///
/// Fails with [`CommsError::Malformed`] when a string or byte field is longer
/// than [`wire::MAX_FIELD_LEN`], so nothing is sent that a receiver would
/// drop as undecodable.
pub fn encode_message(message: &Message) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(initial_capacity(message));
    out.put_u8(PACKET_VERSION);
    out.put_u8(message.case().tag());

    match message {
        Message::Position(p) => {
            out.put_u32_le(p.index);
            for v in [
                p.position_x,
                p.position_y,
                p.position_z,
                p.rotation_x,
                p.rotation_y,
                p.rotation_z,
                p.rotation_w,
            ] {
                out.put_f32_le(v);
            }
        }
        Message::ProfileVersion(v) => {
            wire::put_varint(&mut out, u64::from(v.profile_version));
        }
        Message::ProfileRequest(r) => {
            wire::put_str(&mut out, &r.address)?;
            wire::put_varint(&mut out, u64::from(r.profile_version));
        }
        Message::ProfileResponse(r) => {
            wire::put_str(&mut out, &r.serialized_profile)?;
            wire::put_str(&mut out, &r.base_url)?;
        }
        Message::Chat(c) => {
            out.put_f64_le(c.timestamp);
            wire::put_str(&mut out, &c.message)?;
        }
        Message::Scene(s) => {
            wire::put_str(&mut out, &s.scene_id)?;
            wire::put_bytes(&mut out, &s.data)?;
        }
        Message::Voice(v) => {
            out.put_u32_le(v.index);
            out.put_u8(v.codec.tag());
            wire::put_bytes(&mut out, &v.encoded_samples)?;
        }
    }

    Ok(out.freeze())
}

fn initial_capacity(message: &Message) -> usize {
    PACKET_HEADER_LEN
        + match message {
            Message::Position(_) => POSITION_PACKET_LEN - PACKET_HEADER_LEN,
            Message::ProfileVersion(_) => 5,
            Message::ProfileRequest(r) => r.address.len() + 10,
            Message::ProfileResponse(r) => r.serialized_profile.len() + r.base_url.len() + 10,
            Message::Chat(c) => c.message.len() + 13,
            Message::Scene(s) => s.scene_id.len() + s.data.len() + 10,
            Message::Voice(v) => v.encoded_samples.len() + 10,
        }
}

/// Decode without ever failing: anything unreadable becomes the empty packet.
pub fn decode_packet(buf: Bytes) -> Packet {
    match try_decode_packet(buf) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable packet treated as empty");
            Packet::empty()
        }
    }
}

/// Decode and report why bytes could not be read.
///
/// Unknown case tags are not an error: they yield `Ok(Packet::empty())`.
pub fn try_decode_packet(mut buf: Bytes) -> Result<Packet> {
    let v = wire::get_u8(&mut buf)
        .map_err(|_| CommsError::Malformed("packet too short".into()))?;
    if v != PACKET_VERSION {
        return Err(CommsError::UnsupportedVersion(v));
    }
    let tag = wire::get_u8(&mut buf)
        .map_err(|_| CommsError::Malformed("packet too short".into()))?;

    let Some(case) = PacketCase::from_tag(tag) else {
        return Ok(Packet::empty());
    };

    let message = match case {
        PacketCase::Position => Message::Position(Position {
            index: wire::get_u32(&mut buf)?,
            position_x: wire::get_f32(&mut buf)?,
            position_y: wire::get_f32(&mut buf)?,
            position_z: wire::get_f32(&mut buf)?,
            rotation_x: wire::get_f32(&mut buf)?,
            rotation_y: wire::get_f32(&mut buf)?,
            rotation_z: wire::get_f32(&mut buf)?,
            rotation_w: wire::get_f32(&mut buf)?,
        }),
        PacketCase::ProfileVersion => Message::ProfileVersion(AnnounceProfileVersion {
            profile_version: get_u32_varint(&mut buf)?,
        }),
        PacketCase::ProfileRequest => Message::ProfileRequest(ProfileRequest {
            address: wire::get_string(&mut buf)?,
            profile_version: get_u32_varint(&mut buf)?,
        }),
        PacketCase::ProfileResponse => Message::ProfileResponse(ProfileResponse {
            serialized_profile: wire::get_string(&mut buf)?,
            base_url: wire::get_string(&mut buf)?,
        }),
        PacketCase::Chat => {
            let timestamp = wire::get_f64(&mut buf)?;
            Message::Chat(Chat {
                message: wire::get_string(&mut buf)?,
                timestamp,
            })
        }
        PacketCase::Scene => Message::Scene(Scene {
            scene_id: wire::get_string(&mut buf)?,
            data: wire::get_bytes(&mut buf)?,
        }),
        PacketCase::Voice => {
            let index = wire::get_u32(&mut buf)?;
            let codec = VoiceCodec::from_tag(wire::get_u8(&mut buf)?);
            Message::Voice(Voice {
                encoded_samples: wire::get_bytes(&mut buf)?,
                index,
                codec,
            })
        }
    };

    Ok(Packet::new(message))
}

/// Read the case of an encoded packet from its header only.
pub fn peek_case(buf: &[u8]) -> Option<PacketCase> {
    match buf {
        [PACKET_VERSION, tag, ..] => PacketCase::from_tag(*tag),
        _ => None,
    }
}

fn get_u32_varint(buf: &mut Bytes) -> Result<u32> {
    let v = wire::get_varint(buf)?;
    u32::try_from(v).map_err(|_| CommsError::Malformed(format!("value {v} exceeds u32")))
}
