//! QUIC stream identifiers (RFC 9000 Section 2.1).

use std::fmt;

use quinn_proto::{Dir, Side};

/// A QUIC stream identifier.
///
/// Bit 0 carries the initiator (0 = client), bit 1 the directionality
/// (0 = bidirectional). The remaining bits are the per-type index, so
/// client-initiated bidirectional streams are numbered 0, 4, 8, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The `index`-th client-initiated bidirectional stream.
    pub const fn client_bidi(index: u64) -> Self {
        Self(index << 2)
    }

    /// The `index`-th client-initiated unidirectional stream.
    pub const fn client_uni(index: u64) -> Self {
        Self((index << 2) | 0x2)
    }

    /// The `index`-th server-initiated unidirectional stream.
    pub const fn server_uni(index: u64) -> Self {
        Self((index << 2) | 0x3)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn index(self) -> u64 {
        self.0 >> 2
    }

    pub const fn is_client_initiated(self) -> bool {
        self.0 & 0x1 == 0
    }

    pub const fn is_bidi(self) -> bool {
        self.0 & 0x2 == 0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<quinn_proto::StreamId> for StreamId {
    fn from(id: quinn_proto::StreamId) -> Self {
        Self(u64::from(id))
    }
}

impl From<StreamId> for quinn_proto::StreamId {
    fn from(id: StreamId) -> Self {
        let side = if id.is_client_initiated() {
            Side::Client
        } else {
            Side::Server
        };
        let dir = if id.is_bidi() { Dir::Bi } else { Dir::Uni };
        quinn_proto::StreamId::new(side, dir, id.index())
    }
}
