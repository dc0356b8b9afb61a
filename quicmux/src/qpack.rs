//! Stateless QPACK field section codec (RFC 9204).
//!
//! The client advertises a dynamic table capacity of zero, so every field
//! section it sends or accepts uses only the static table and literals.
//! Blocked-stream and encoder/decoder-stream machinery never engages.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, H3ErrorCode};
use crate::huffman;

/// One header name/value pair as carried in a field section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
}

impl HeaderField {
    pub fn new(name: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// RFC 9114 Section 4.2.2 size: name + value + 32.
    pub fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

/// Encodes request field sections and decodes response field sections.
///
/// One codec serves a whole connection.
pub trait HeaderCodec {
    fn encode(&mut self, fields: &[HeaderField], buf: &mut BytesMut);

    fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, Error>;
}

/// QPACK restricted to the static table.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticTableCodec;

impl HeaderCodec for StaticTableCodec {
    fn encode(&mut self, fields: &[HeaderField], buf: &mut BytesMut) {
        encode_field_section(fields, buf);
    }

    fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, Error> {
        decode_field_section(block)
    }
}

// ── Prefixed integers (RFC 9204 Section 4.1.1) ──────────────────────

fn put_prefixed(buf: &mut BytesMut, flags: u8, prefix: u8, value: u64) {
    let limit = (1u64 << prefix) - 1;
    if value < limit {
        buf.put_u8(flags | value as u8);
        return;
    }
    buf.put_u8(flags | limit as u8);
    let mut rest = value - limit;
    while rest >= 0x80 {
        buf.put_u8(0x80 | (rest as u8 & 0x7f));
        rest >>= 7;
    }
    buf.put_u8(rest as u8);
}

/// A cursor over a field section.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    fn prefixed(&mut self, prefix: u8) -> Result<u64, Error> {
        let first = self.peek().ok_or_else(failed)?;
        self.pos += 1;
        let limit = (1u64 << prefix) - 1;
        let mut value = u64::from(first) & limit;
        if value < limit {
            return Ok(value);
        }
        let mut shift = 0u32;
        loop {
            let b = self.peek().ok_or_else(failed)?;
            self.pos += 1;
            if shift > 56 {
                return Err(failed());
            }
            value += u64::from(b & 0x7f) << shift;
            shift += 7;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
    }

    /// String literal whose length uses `prefix` bits and whose Huffman flag
    /// is the bit just above the prefix.
    fn string(&mut self, prefix: u8) -> Result<Bytes, Error> {
        let first = self.peek().ok_or_else(failed)?;
        let huffman_coded = first & (1 << prefix) != 0;
        let len = usize::try_from(self.prefixed(prefix)?).map_err(|_| failed())?;
        let end = self.pos.checked_add(len).ok_or_else(failed)?;
        let raw = self.buf.get(self.pos..end).ok_or_else(failed)?;
        self.pos = end;
        if huffman_coded {
            huffman::decode(raw).map(Bytes::from).ok_or_else(failed)
        } else {
            Ok(Bytes::copy_from_slice(raw))
        }
    }
}

fn failed() -> Error {
    Error::protocol(
        H3ErrorCode::QpackDecompressionFailed,
        "invalid field section",
    )
}

fn put_string(buf: &mut BytesMut, flags: u8, prefix: u8, data: &[u8]) {
    let coded_len = huffman::encoded_len(data);
    if coded_len < data.len() {
        put_prefixed(buf, flags | (1 << prefix), prefix, coded_len as u64);
        let mut coded = Vec::with_capacity(coded_len);
        huffman::encode(data, &mut coded);
        buf.extend_from_slice(&coded);
    } else {
        put_prefixed(buf, flags, prefix, data.len() as u64);
        buf.extend_from_slice(data);
    }
}

// ── Static table (RFC 9204 Appendix A) ──────────────────────────────

const STATIC_TABLE: [(&[u8], &[u8]); 99] = [
    (b":authority", b""),
    (b":path", b"/"),
    (b"age", b"0"),
    (b"content-disposition", b""),
    (b"content-length", b"0"),
    (b"cookie", b""),
    (b"date", b""),
    (b"etag", b""),
    (b"if-modified-since", b""),
    (b"if-none-match", b""),
    (b"last-modified", b""),
    (b"link", b""),
    (b"location", b""),
    (b"referer", b""),
    (b"set-cookie", b""),
    (b":method", b"CONNECT"),
    (b":method", b"DELETE"),
    (b":method", b"GET"),
    (b":method", b"HEAD"),
    (b":method", b"OPTIONS"),
    (b":method", b"POST"),
    (b":method", b"PUT"),
    (b":scheme", b"http"),
    (b":scheme", b"https"),
    (b":status", b"103"),
    (b":status", b"200"),
    (b":status", b"304"),
    (b":status", b"404"),
    (b":status", b"503"),
    (b"accept", b"*/*"),
    (b"accept", b"application/dns-message"),
    (b"accept-encoding", b"gzip, deflate, br"),
    (b"accept-ranges", b"bytes"),
    (b"access-control-allow-headers", b"cache-control"),
    (b"access-control-allow-headers", b"content-type"),
    (b"access-control-allow-origin", b"*"),
    (b"cache-control", b"max-age=0"),
    (b"cache-control", b"max-age=2592000"),
    (b"cache-control", b"max-age=604800"),
    (b"cache-control", b"no-cache"),
    (b"cache-control", b"no-store"),
    (b"cache-control", b"public, max-age=31536000"),
    (b"content-encoding", b"br"),
    (b"content-encoding", b"gzip"),
    (b"content-type", b"application/dns-message"),
    (b"content-type", b"application/javascript"),
    (b"content-type", b"application/json"),
    (b"content-type", b"application/x-www-form-urlencoded"),
    (b"content-type", b"image/gif"),
    (b"content-type", b"image/jpeg"),
    (b"content-type", b"image/png"),
    (b"content-type", b"text/css"),
    (b"content-type", b"text/html; charset=utf-8"),
    (b"content-type", b"text/plain"),
    (b"content-type", b"text/plain;charset=utf-8"),
    (b"range", b"bytes=0-"),
    (b"strict-transport-security", b"max-age=31536000"),
    (b"strict-transport-security", b"max-age=31536000; includesubdomains"),
    (b"strict-transport-security", b"max-age=31536000; includesubdomains; preload"),
    (b"vary", b"accept-encoding"),
    (b"vary", b"origin"),
    (b"x-content-type-options", b"nosniff"),
    (b"x-xss-protection", b"1; mode=block"),
    (b":status", b"100"),
    (b":status", b"204"),
    (b":status", b"206"),
    (b":status", b"302"),
    (b":status", b"400"),
    (b":status", b"403"),
    (b":status", b"421"),
    (b":status", b"425"),
    (b":status", b"500"),
    (b"accept-language", b""),
    (b"access-control-allow-credentials", b"FALSE"),
    (b"access-control-allow-credentials", b"TRUE"),
    (b"access-control-allow-headers", b"*"),
    (b"access-control-allow-methods", b"get"),
    (b"access-control-allow-methods", b"get, post, options"),
    (b"access-control-allow-methods", b"options"),
    (b"access-control-expose-headers", b"content-length"),
    (b"access-control-request-headers", b"content-type"),
    (b"access-control-request-method", b"get"),
    (b"access-control-request-method", b"post"),
    (b"alt-svc", b"clear"),
    (b"authorization", b""),
    (b"content-security-policy", b"script-src 'none'; object-src 'none'; base-uri 'none'"),
    (b"early-data", b"1"),
    (b"expect-ct", b""),
    (b"forwarded", b""),
    (b"if-range", b""),
    (b"origin", b""),
    (b"purpose", b"prefetch"),
    (b"server", b""),
    (b"timing-allow-origin", b"*"),
    (b"upgrade-insecure-requests", b"1"),
    (b"user-agent", b""),
    (b"x-forwarded-for", b""),
    (b"x-frame-options", b"deny"),
    (b"x-frame-options", b"sameorigin"),
];

enum StaticMatch {
    Full(usize),
    Name(usize),
    None,
}

fn lookup(field: &HeaderField) -> StaticMatch {
    let mut name_match = None;
    for (i, (name, value)) in STATIC_TABLE.iter().enumerate() {
        if *name == &field.name[..] {
            if *value == &field.value[..] {
                return StaticMatch::Full(i);
            }
            name_match.get_or_insert(i);
        }
    }
    name_match.map_or(StaticMatch::None, StaticMatch::Name)
}

fn static_entry(index: u64) -> Result<(&'static [u8], &'static [u8]), Error> {
    usize::try_from(index)
        .ok()
        .and_then(|i| STATIC_TABLE.get(i).copied())
        .ok_or_else(failed)
}

// ── Field sections (RFC 9204 Section 4.5) ───────────────────────────

/// Encode `fields` as a field section with no dynamic table references.
pub fn encode_field_section(fields: &[HeaderField], buf: &mut BytesMut) {
    // Required Insert Count 0, Delta Base 0.
    buf.put_u8(0);
    buf.put_u8(0);
    for field in fields {
        match lookup(field) {
            // Indexed field line, static: 11 + 6-bit index.
            StaticMatch::Full(i) => put_prefixed(buf, 0xc0, 6, i as u64),
            // Literal with static name reference: 0101 + 4-bit index.
            StaticMatch::Name(i) => {
                put_prefixed(buf, 0x50, 4, i as u64);
                put_string(buf, 0x00, 7, &field.value);
            }
            // Literal with literal name: 0010 + H + 3-bit length.
            StaticMatch::None => {
                put_string(buf, 0x20, 3, &field.name);
                put_string(buf, 0x00, 7, &field.value);
            }
        }
    }
}

/// Decode a field section that references only the static table.
pub fn decode_field_section(block: &[u8]) -> Result<Vec<HeaderField>, Error> {
    let mut r = Reader { buf: block, pos: 0 };
    if r.prefixed(8)? != 0 {
        return Err(Error::protocol(
            H3ErrorCode::QpackDecompressionFailed,
            "dynamic table reference with zero capacity",
        ));
    }
    r.prefixed(7)?;

    let mut fields = Vec::new();
    while let Some(first) = r.peek() {
        let field = if first & 0x80 != 0 {
            if first & 0x40 == 0 {
                return Err(failed());
            }
            let (name, value) = static_entry(r.prefixed(6)?)?;
            HeaderField::new(Bytes::from_static(name), Bytes::from_static(value))
        } else if first & 0x40 != 0 {
            if first & 0x10 == 0 {
                return Err(failed());
            }
            let (name, _) = static_entry(r.prefixed(4)?)?;
            HeaderField::new(Bytes::from_static(name), r.string(7)?)
        } else if first & 0x20 != 0 {
            let name = r.string(3)?;
            HeaderField::new(name, r.string(7)?)
        } else {
            // Post-base forms always reference the dynamic table.
            return Err(failed());
        };
        fields.push(field);
    }
    Ok(fields)
}
