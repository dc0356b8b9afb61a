//! HTTP/3 frame codec and QUIC variable-length integers.
//!
//! A frame is a varint type, a varint payload length and the payload. The
//! decoder consumes complete frames from the front of a reassembly buffer
//! and leaves partial frames in place until more bytes arrive.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, H3ErrorCode};
use crate::settings::Settings;

// ── Frame types (RFC 9114 Section 7.2) ──────────────────────────────

pub const FRAME_DATA: u64 = 0x00;
pub const FRAME_HEADERS: u64 = 0x01;
pub const FRAME_CANCEL_PUSH: u64 = 0x03;
pub const FRAME_SETTINGS: u64 = 0x04;
pub const FRAME_PUSH_PROMISE: u64 = 0x05;
pub const FRAME_GOAWAY: u64 = 0x07;
pub const FRAME_MAX_PUSH_ID: u64 = 0x0d;

/// HTTP/2 frame types with no HTTP/3 meaning (RFC 9114 Section 7.2.8).
const RESERVED_H2_TYPES: [u64; 4] = [0x02, 0x06, 0x08, 0x09];

/// Largest value a QUIC varint can carry.
pub const VARINT_MAX: u64 = (1 << 62) - 1;

// ── Variable-length integers (RFC 9000 Section 16) ──────────────────

/// Append `value` as a QUIC varint. Values above [`VARINT_MAX`] are clamped.
pub fn put_varint(buf: &mut BytesMut, value: u64) {
    let value = value.min(VARINT_MAX);
    match varint_len(value) {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(0x4000 | value as u16),
        4 => buf.put_u32(0x8000_0000 | value as u32),
        _ => buf.put_u64(0xc000_0000_0000_0000 | value),
    }
}

/// Read a varint from the front of `buf`: `(value, length)`, or `None` when
/// `buf` ends mid-integer.
pub fn peek_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let len = 1usize << (first >> 6);
    let bytes = buf.get(..len)?;
    let value = bytes[1..]
        .iter()
        .fold(u64::from(first & 0x3f), |acc, &b| (acc << 8) | u64::from(b));
    Some((value, len))
}

pub fn varint_len(value: u64) -> usize {
    match value {
        0..0x40 => 1,
        0x40..0x4000 => 2,
        0x4000..0x4000_0000 => 4,
        _ => 8,
    }
}

// ── Frames ──────────────────────────────────────────────────────────

/// One HTTP/3 frame as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    /// A QPACK-encoded field section.
    Headers(Bytes),
    CancelPush(u64),
    Settings(Settings),
    /// Push ID of a server push; the field section is not kept.
    PushPromise(u64),
    /// Stream ID on the client's side of a GOAWAY.
    GoAway(u64),
    MaxPushId(u64),
    /// Extension and grease frames; ignored by receivers.
    Unknown(u64),
}

impl Frame {
    pub fn frame_type(&self) -> u64 {
        match self {
            Self::Data(_) => FRAME_DATA,
            Self::Headers(_) => FRAME_HEADERS,
            Self::CancelPush(_) => FRAME_CANCEL_PUSH,
            Self::Settings(_) => FRAME_SETTINGS,
            Self::PushPromise(_) => FRAME_PUSH_PROMISE,
            Self::GoAway(_) => FRAME_GOAWAY,
            Self::MaxPushId(_) => FRAME_MAX_PUSH_ID,
            Self::Unknown(t) => *t,
        }
    }

    /// Append the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Data(payload) | Self::Headers(payload) => {
                put_varint(buf, self.frame_type());
                put_varint(buf, payload.len() as u64);
                buf.extend_from_slice(payload);
            }
            Self::Settings(settings) => {
                let mut payload = BytesMut::new();
                settings.encode(&mut payload);
                put_varint(buf, FRAME_SETTINGS);
                put_varint(buf, payload.len() as u64);
                buf.extend_from_slice(&payload);
            }
            Self::CancelPush(id) | Self::PushPromise(id) | Self::GoAway(id) | Self::MaxPushId(id) => {
                put_varint(buf, self.frame_type());
                put_varint(buf, varint_len(*id) as u64);
                put_varint(buf, *id);
            }
            Self::Unknown(frame_type) => {
                put_varint(buf, *frame_type);
                put_varint(buf, 0);
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// Type and announced payload length of the frame at the front of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_type: u64,
    pub payload_len: u64,
    /// Bytes taken by the type and length varints.
    pub header_len: usize,
}

/// Parse the frame header at the front of `buf` without consuming anything.
///
/// Returns `Ok(None)` until both varints have arrived. Reserved HTTP/2 frame
/// types are rejected here, before their payload is buffered.
pub fn peek_frame_header(buf: &[u8]) -> Result<Option<FrameHeader>, Error> {
    let Some((frame_type, type_len)) = peek_varint(buf) else {
        return Ok(None);
    };
    let Some((payload_len, len_len)) = peek_varint(&buf[type_len..]) else {
        return Ok(None);
    };
    if RESERVED_H2_TYPES.contains(&frame_type) {
        return Err(Error::protocol(
            H3ErrorCode::FrameUnexpected,
            format!("reserved HTTP/2 frame type {frame_type:#x}"),
        ));
    }
    Ok(Some(FrameHeader {
        frame_type,
        payload_len,
        header_len: type_len + len_len,
    }))
}

/// Remove one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched if the frame is incomplete.
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
    let Some(FrameHeader {
        frame_type,
        payload_len,
        header_len,
    }) = peek_frame_header(buf)?
    else {
        return Ok(None);
    };
    let Some(total) = usize::try_from(payload_len)
        .ok()
        .and_then(|len| len.checked_add(header_len))
    else {
        return Err(Error::protocol(H3ErrorCode::ExcessiveLoad, "frame length overflow"));
    };
    if buf.len() < total {
        return Ok(None);
    }

    buf.advance(header_len);
    let payload = buf.split_to(total - header_len).freeze();

    let frame = match frame_type {
        FRAME_DATA => Frame::Data(payload),
        FRAME_HEADERS => Frame::Headers(payload),
        FRAME_SETTINGS => Frame::Settings(Settings::decode(&payload)?),
        FRAME_CANCEL_PUSH => Frame::CancelPush(single_varint(&payload)?),
        FRAME_PUSH_PROMISE => {
            let (id, _) = peek_varint(&payload).ok_or_else(malformed)?;
            Frame::PushPromise(id)
        }
        FRAME_GOAWAY => Frame::GoAway(single_varint(&payload)?),
        FRAME_MAX_PUSH_ID => Frame::MaxPushId(single_varint(&payload)?),
        other => Frame::Unknown(other),
    };
    Ok(Some(frame))
}

/// Payload that is exactly one varint.
fn single_varint(payload: &[u8]) -> Result<u64, Error> {
    match peek_varint(payload) {
        Some((value, len)) if len == payload.len() => Ok(value),
        _ => Err(malformed()),
    }
}

fn malformed() -> Error {
    Error::protocol(H3ErrorCode::FrameError, "malformed frame payload")
}
