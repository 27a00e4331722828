//! Field-level primitives shared by the packet codec and the mesh frame.
//!
//! Parsing rules (same as the rest of the protocol module):
//! - Never index (`buf[0]`), always check `remaining()` before `get_*`.
//! - Never `unwrap()` / `expect()` / `panic!()`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CommsError, Result};

/// Largest single field, enforced on both encode and decode.
pub const MAX_FIELD_LEN: usize = 1 << 20;

/// LEB128 unsigned varint.
pub fn put_varint(out: &mut BytesMut, mut v: u64) {
    while v >= 0x80 {
        out.put_u8((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.put_u8(v as u8);
}

pub fn get_varint(buf: &mut Bytes) -> Result<u64> {
    let mut v: u64 = 0;
    for shift in (0..64).step_by(7) {
        if !buf.has_remaining() {
            return Err(CommsError::Malformed("truncated varint".into()));
        }
        let b = buf.get_u8();
        v |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(v);
        }
    }
    Err(CommsError::Malformed("varint overflow".into()))
}

/// Length-prefixed bytes. Fails for fields the decoder would refuse.
pub fn put_bytes(out: &mut BytesMut, data: &[u8]) -> Result<()> {
    if data.len() > MAX_FIELD_LEN {
        return Err(CommsError::Malformed(format!(
            "field length {} exceeds {MAX_FIELD_LEN}",
            data.len()
        )));
    }
    put_varint(out, data.len() as u64);
    out.put_slice(data);
    Ok(())
}

/// Length-prefixed bytes (zero-copy slice of `buf`).
pub fn get_bytes(buf: &mut Bytes) -> Result<Bytes> {
    let len = get_varint(buf)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|l| *l <= MAX_FIELD_LEN)
        .ok_or_else(|| CommsError::Malformed(format!("field length {len} too large")))?;
    if buf.remaining() < len {
        return Err(CommsError::Malformed("field shorter than its length prefix".into()));
    }
    Ok(buf.copy_to_bytes(len))
}

pub fn put_str(out: &mut BytesMut, s: &str) -> Result<()> {
    put_bytes(out, s.as_bytes())
}

pub fn get_string(buf: &mut Bytes) -> Result<String> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|e| CommsError::Malformed(format!("utf8 invalid: {e}")))
}

pub fn get_u8(buf: &mut Bytes) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u32(buf: &mut Bytes) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn get_u64(buf: &mut Bytes) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

pub fn get_f32(buf: &mut Bytes) -> Result<f32> {
    need(buf, 4)?;
    Ok(buf.get_f32_le())
}

pub fn get_f64(buf: &mut Bytes) -> Result<f64> {
    need(buf, 8)?;
    Ok(buf.get_f64_le())
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(CommsError::Malformed(format!(
            "need {n} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}
