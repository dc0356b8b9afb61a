//! Client crypto configuration strategy.

use std::sync::Arc;

use quinn_proto::ClientConfig;
use quinn_proto::crypto::rustls::QuicClientConfig;

use crate::config::{QuicVersion, ServerId};
use crate::error::Error;

/// Builds the handshake configuration for one connection attempt.
///
/// The connection asks the factory once per `connect`, so an implementation
/// can pick credentials, session caches or verifiers per server identity.
pub trait CryptoConfigFactory {
    fn client_config(&self, server: &ServerId, version: QuicVersion) -> Result<ClientConfig, Error>;
}

/// rustls-backed factory.
///
/// The ALPN list is replaced with the HTTP/3 token for the negotiated version.
/// In privacy mode, TLS session resumption is disabled so the connection
/// shares no state with earlier sessions to the same host.
#[derive(Clone)]
pub struct RustlsCryptoFactory {
    tls: rustls::ClientConfig,
}

impl RustlsCryptoFactory {
    pub fn new(tls: rustls::ClientConfig) -> Self {
        Self { tls }
    }
}

impl CryptoConfigFactory for RustlsCryptoFactory {
    fn client_config(&self, server: &ServerId, version: QuicVersion) -> Result<ClientConfig, Error> {
        let mut tls = self.tls.clone();
        tls.alpn_protocols = vec![version.alpn().to_vec()];
        if server.privacy_mode {
            tls.resumption = rustls::client::Resumption::disabled();
        }
        let quic = QuicClientConfig::try_from(tls).map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(ClientConfig::new(Arc::new(quic)))
    }
}
