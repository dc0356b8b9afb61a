use std::fmt;
use std::sync::Arc;

use quinn_proto::EndpointConfig;

/// QUIC versions a client session may offer.
///
/// Passed explicitly through [`TransportConfig::supported_versions`]; the
/// first entry is the version used for the Initial packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuicVersion {
    /// draft-ietf-quic-transport-29 with `h3-29`.
    Draft29,
    /// RFC 9000 version 1 with `h3`.
    Rfc1,
}

impl QuicVersion {
    /// Version number as carried in the long header.
    pub const fn wire(self) -> u32 {
        match self {
            Self::Draft29 => 0xff00_001d,
            Self::Rfc1 => 0x0000_0001,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0xff00_001d => Some(Self::Draft29),
            0x0000_0001 => Some(Self::Rfc1),
            _ => None,
        }
    }

    /// ALPN token for HTTP/3 over this version.
    pub const fn alpn(self) -> &'static [u8] {
        match self {
            Self::Draft29 => b"h3-29",
            Self::Rfc1 => b"h3",
        }
    }

    /// Every version of this set maps HTTP semantics onto HTTP/3 framing.
    pub const fn uses_http3(self) -> bool {
        true
    }
}

impl fmt::Display for QuicVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft29 => write!(f, "draft-29"),
            Self::Rfc1 => write!(f, "RFC v1"),
        }
    }
}

/// Identity of the remote server: the TLS name, the port, and whether the
/// connection runs in privacy mode (no client credentials, no resumption
/// state shared with non-private sessions).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerId {
    pub host: String,
    pub port: u16,
    pub privacy_mode: bool,
}

impl ServerId {
    pub fn new(host: impl Into<String>, port: u16, privacy_mode: bool) -> Self {
        Self {
            host: host.into(),
            port,
            privacy_mode,
        }
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Configuration for a [`QuicClientConnection`](crate::QuicClientConnection).
pub struct TransportConfig {
    /// Endpoint configuration (connection IDs, reset keys). Its version list is
    /// overwritten from `supported_versions`.
    pub endpoint_config: EndpointConfig,
    /// Versions offered to the server, most preferred first. Default: RFC v1
    /// then draft-29.
    pub supported_versions: Vec<QuicVersion>,
    /// Transport parameters (idle timeout, stream limits). `None` keeps
    /// quinn-proto's defaults.
    pub transport: Option<Arc<quinn_proto::TransportConfig>>,
    /// Maximum queued outgoing packets before dropping. Default: 4096.
    pub send_queue_capacity: usize,
    /// Allow path MTU discovery. Default: true.
    pub allow_mtud: bool,
    /// Deterministic RNG seed for testing. Default: `None` (random).
    pub rng_seed: Option<[u8; 32]>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint_config: EndpointConfig::default(),
            supported_versions: vec![QuicVersion::Rfc1, QuicVersion::Draft29],
            transport: None,
            send_queue_capacity: 4096,
            allow_mtud: true,
            rng_seed: None,
        }
    }
}

impl TransportConfig {
    /// Config offering exactly the given versions.
    pub fn with_versions(versions: Vec<QuicVersion>) -> Self {
        Self {
            supported_versions: versions,
            ..Self::default()
        }
    }

    /// Version used for the first flight.
    pub fn initial_version(&self) -> QuicVersion {
        self.supported_versions
            .first()
            .copied()
            .unwrap_or(QuicVersion::Rfc1)
    }
}
