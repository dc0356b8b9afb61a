use quicmux_transport::{QuicVersion, ServerId};

use crate::bridge::ResetPolicy;
use crate::settings::Settings;

/// Default per-stream send buffer limit: 1 MiB.
pub const DEFAULT_SEND_BUFFER_LIMIT: usize = 1024 * 1024;

/// Default limit on a received field section: 64 KiB.
pub const DEFAULT_MAX_FIELD_SECTION_SIZE: usize = 64 * 1024;

/// Configuration for a [`ClientSession`](crate::ClientSession).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The remote server this session talks to.
    pub server_id: ServerId,
    /// Versions offered, most preferred first. The first entry is reported
    /// as the session's version. Default: RFC v1 then draft-29.
    pub versions: Vec<QuicVersion>,
    /// Maximum bytes buffered per stream when the transport is blocked.
    /// Default: 1 MiB.
    pub send_buffer_limit: usize,
    /// Largest response field section accepted before the stream is reset.
    /// Default: 64 KiB.
    pub max_field_section_size: usize,
    /// Peer reset code to reset reason mapping. Default: the HTTP/3 table.
    pub reset_policy: ResetPolicy,
    /// SETTINGS sent on the control stream.
    pub settings: Settings,
}

impl SessionConfig {
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            versions: vec![QuicVersion::Rfc1, QuicVersion::Draft29],
            send_buffer_limit: DEFAULT_SEND_BUFFER_LIMIT,
            max_field_section_size: DEFAULT_MAX_FIELD_SECTION_SIZE,
            reset_policy: ResetPolicy::default(),
            settings: Settings {
                max_field_section_size: Some(DEFAULT_MAX_FIELD_SECTION_SIZE as u64),
                ..Settings::default()
            },
        }
    }

    pub fn with_versions(mut self, versions: Vec<QuicVersion>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_send_buffer_limit(mut self, limit: usize) -> Self {
        self.send_buffer_limit = limit;
        self
    }

    /// Sets the local limit and the advertised SETTINGS value together.
    pub fn with_max_field_section_size(mut self, size: usize) -> Self {
        self.max_field_section_size = size;
        self.settings.max_field_section_size = Some(size as u64);
        self
    }

    pub fn with_reset_policy(mut self, policy: ResetPolicy) -> Self {
        self.reset_policy = policy;
        self
    }

    pub fn version(&self) -> QuicVersion {
        self.versions.first().copied().unwrap_or(QuicVersion::Rfc1)
    }
}
