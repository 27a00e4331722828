//! Mesh frame: the envelope around a packet on mesh transports.
//!
//! Layout:
//! - `v` (u8): frame version, currently 1
//! - `flags` (u8): bit 0 set when a chat id follows
//! - sender address (varint-prefixed utf8)
//! - timestamp (u64 LE, ms since unix epoch)
//! - chat id (varint, only with flag bit 0)
//! - packet bytes (rest of the frame)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use commlink_core::error::{CommsError, Result};
use commlink_core::protocol::wire;

pub const FRAME_VERSION: u8 = 1;

const FLAG_CHAT_ID: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshFrame {
    pub sender: String,
    pub timestamp_ms: u64,
    pub chat_id: Option<u64>,
    pub packet: Bytes,
}

/// Fails only for a sender address over [`wire::MAX_FIELD_LEN`].
pub fn encode_frame(frame: &MeshFrame) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(frame.sender.len() + frame.packet.len() + 24);
    out.put_u8(FRAME_VERSION);
    out.put_u8(if frame.chat_id.is_some() { FLAG_CHAT_ID } else { 0 });
    wire::put_str(&mut out, &frame.sender)?;
    out.put_u64_le(frame.timestamp_ms);
    if let Some(id) = frame.chat_id {
        wire::put_varint(&mut out, id);
    }
    out.put_slice(&frame.packet);
    Ok(out.freeze())
}

pub fn decode_frame(mut buf: Bytes) -> Result<MeshFrame> {
    let v = wire::get_u8(&mut buf)?;
    if v != FRAME_VERSION {
        return Err(CommsError::UnsupportedVersion(v));
    }
    let flags = wire::get_u8(&mut buf)?;
    let sender = wire::get_string(&mut buf)?;
    let timestamp_ms = wire::get_u64(&mut buf)?;
    let chat_id = if flags & FLAG_CHAT_ID != 0 {
        Some(wire::get_varint(&mut buf)?)
    } else {
        None
    };
    let packet = buf.copy_to_bytes(buf.remaining());
    Ok(MeshFrame {
        sender,
        timestamp_ms,
        chat_id,
        packet,
    })
}
