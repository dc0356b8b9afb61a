use bytes::BytesMut;

use crate::error::{Error, H3ErrorCode};
use crate::frame::{peek_varint, put_varint};

const SETTINGS_QPACK_MAX_TABLE_CAPACITY: u64 = 0x01;
const SETTINGS_MAX_FIELD_SECTION_SIZE: u64 = 0x06;
const SETTINGS_QPACK_BLOCKED_STREAMS: u64 = 0x07;

/// HTTP/2 setting identifiers that must not appear in HTTP/3
/// (RFC 9114 Section 7.2.4.1).
const RESERVED_H2_SETTINGS: [u64; 4] = [0x02, 0x03, 0x04, 0x05];

/// HTTP/3 SETTINGS parameters (RFC 9114 Section 7.2.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// SETTINGS_QPACK_MAX_TABLE_CAPACITY. Default 0 (no dynamic table).
    pub qpack_max_table_capacity: u64,
    /// SETTINGS_MAX_FIELD_SECTION_SIZE. `None` means unlimited.
    pub max_field_section_size: Option<u64>,
    /// SETTINGS_QPACK_BLOCKED_STREAMS. Default 0.
    pub qpack_blocked_streams: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            qpack_max_table_capacity: 0,
            max_field_section_size: None,
            qpack_blocked_streams: 0,
        }
    }
}

impl Settings {
    /// Append the (identifier, value) pairs that differ from the defaults.
    pub fn encode(&self, buf: &mut BytesMut) {
        if self.qpack_max_table_capacity != 0 {
            put_varint(buf, SETTINGS_QPACK_MAX_TABLE_CAPACITY);
            put_varint(buf, self.qpack_max_table_capacity);
        }
        if let Some(size) = self.max_field_section_size {
            put_varint(buf, SETTINGS_MAX_FIELD_SECTION_SIZE);
            put_varint(buf, size);
        }
        if self.qpack_blocked_streams != 0 {
            put_varint(buf, SETTINGS_QPACK_BLOCKED_STREAMS);
            put_varint(buf, self.qpack_blocked_streams);
        }
    }

    /// Parse a SETTINGS payload. Unknown identifiers are skipped; duplicates
    /// and HTTP/2 identifiers are H3_SETTINGS_ERROR.
    pub fn decode(mut payload: &[u8]) -> Result<Self, Error> {
        let mut settings = Settings::default();
        let mut seen = Vec::new();
        while !payload.is_empty() {
            let (id, n) = peek_varint(payload).ok_or_else(truncated)?;
            payload = &payload[n..];
            let (value, n) = peek_varint(payload).ok_or_else(truncated)?;
            payload = &payload[n..];

            if RESERVED_H2_SETTINGS.contains(&id) {
                return Err(Error::protocol(
                    H3ErrorCode::SettingsError,
                    format!("HTTP/2 setting {id:#x}"),
                ));
            }
            if seen.contains(&id) {
                return Err(Error::protocol(
                    H3ErrorCode::SettingsError,
                    format!("duplicate setting {id:#x}"),
                ));
            }
            seen.push(id);

            match id {
                SETTINGS_QPACK_MAX_TABLE_CAPACITY => settings.qpack_max_table_capacity = value,
                SETTINGS_MAX_FIELD_SECTION_SIZE => settings.max_field_section_size = Some(value),
                SETTINGS_QPACK_BLOCKED_STREAMS => settings.qpack_blocked_streams = value,
                _ => {}
            }
        }
        Ok(settings)
    }
}

fn truncated() -> Error {
    Error::protocol(H3ErrorCode::FrameError, "truncated SETTINGS payload")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_encode_to_nothing() {
        let mut buf = BytesMut::new();
        Settings::default().encode(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(Settings::decode(&buf).unwrap(), Settings::default());
    }

    #[test]
    fn field_section_limit() {
        let settings = Settings {
            max_field_section_size: Some(16 * 1024),
            ..Settings::default()
        };
        let mut buf = BytesMut::new();
        settings.encode(&mut buf);
        assert_eq!(&buf[..], &[0x06, 0x80, 0x00, 0x40, 0x00]);
        assert_eq!(Settings::decode(&buf).unwrap(), settings);
    }

    #[test]
    fn unknown_and_grease_ignored() {
        // Grease identifier 0x21 plus SETTINGS_ENABLE_CONNECT_PROTOCOL.
        let payload = [0x21, 0x05, 0x08, 0x01, 0x07, 0x10];
        let settings = Settings::decode(&payload).unwrap();
        assert_eq!(settings.qpack_blocked_streams, 0x10);
    }

    #[test]
    fn duplicate_rejected() {
        let payload = [0x01, 0x00, 0x01, 0x00];
        assert!(matches!(
            Settings::decode(&payload),
            Err(Error::ProtocolViolation {
                code: H3ErrorCode::SettingsError,
                ..
            })
        ));
    }

    #[test]
    fn http2_identifier_rejected() {
        // SETTINGS_MAX_CONCURRENT_STREAMS from HTTP/2.
        let payload = [0x03, 0x64];
        assert!(Settings::decode(&payload).is_err());
    }

    #[test]
    fn truncated_value() {
        let payload = [0x06];
        assert!(matches!(
            Settings::decode(&payload),
            Err(Error::ProtocolViolation {
                code: H3ErrorCode::FrameError,
                ..
            })
        ));
    }
}
