//! Integration tests: QuicClientConnection against an in-memory quinn-proto
//! server endpoint.
//!
//! Datagrams are shuttled between the two state machines without sockets,
//! so every test is deterministic apart from the handshake keys.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use quinn_proto::{
    ConnectionError, ConnectionHandle, DatagramEvent, Dir, Endpoint, EndpointConfig, Event,
    ServerConfig, StreamEvent, VarInt,
};
use quicmux_transport::{
    CloseCode, ConnectionState, Error, PacketWriter, QuicClientConnection, QuicVersion,
    RustlsCryptoFactory, ServerId, StreamId, Transport, TransportConfig, TransportEvent,
    WriteStatus,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

// ── TLS cert generation ──────────────────────────────────────────────

fn generate_self_signed() -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());
    let cert_der = CertificateDer::from(cert.cert);
    (vec![cert_der], key.into())
}

fn server_config(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Arc<ServerConfig> {
    let mut tls = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    tls.alpn_protocols = vec![b"h3".to_vec(), b"h3-29".to_vec()];
    let quic = quinn_proto::crypto::rustls::QuicServerConfig::try_from(tls).unwrap();
    let mut sc = ServerConfig::with_crypto(Arc::new(quic));
    let transport = Arc::get_mut(&mut sc.transport).unwrap();
    transport.max_concurrent_bidi_streams(8u32.into());
    transport.max_concurrent_uni_streams(8u32.into());
    Arc::new(sc)
}

fn client_crypto(certs: &[CertificateDer<'static>]) -> RustlsCryptoFactory {
    let mut roots = rustls::RootCertStore::empty();
    for cert in certs {
        roots.add(cert.clone()).unwrap();
    }
    let tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    RustlsCryptoFactory::new(tls)
}

// ── Packet capture ───────────────────────────────────────────────────

#[derive(Default)]
struct Capture {
    packets: Vec<(SocketAddr, Vec<u8>)>,
    /// Accept at most this many packets per flush, then report Blocked.
    budget: Option<usize>,
}

impl PacketWriter for Capture {
    fn write_packet(&mut self, destination: SocketAddr, data: &[u8]) -> io::Result<WriteStatus> {
        if let Some(budget) = self.budget.as_mut() {
            if *budget == 0 {
                return Ok(WriteStatus::Blocked);
            }
            *budget -= 1;
        }
        self.packets.push((destination, data.to_vec()));
        Ok(WriteStatus::Written)
    }
}

// ── In-memory server ─────────────────────────────────────────────────

/// A quinn-proto server that echoes every bidirectional stream and records
/// how its connection ended.
struct EchoServer {
    endpoint: Endpoint,
    addr: SocketAddr,
    conn: Option<(ConnectionHandle, quinn_proto::Connection)>,
    streams: Vec<quinn_proto::StreamId>,
    lost: Option<ConnectionError>,
    buf: Vec<u8>,
}

impl EchoServer {
    fn new(config: Arc<ServerConfig>, addr: SocketAddr) -> Self {
        Self {
            endpoint: Endpoint::new(Arc::new(EndpointConfig::default()), Some(config), true, None),
            addr,
            conn: None,
            streams: Vec::new(),
            lost: None,
            buf: Vec::with_capacity(1500),
        }
    }

    fn handle_datagram(&mut self, now: Instant, peer: SocketAddr, data: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        self.buf.clear();
        match self
            .endpoint
            .handle(now, peer, None, None, BytesMut::from(data), &mut self.buf)
        {
            Some(DatagramEvent::NewConnection(incoming)) => {
                let mut resp = Vec::new();
                match self.endpoint.accept(incoming, now, &mut resp, None) {
                    Ok((ch, conn)) => self.conn = Some((ch, conn)),
                    Err(e) => {
                        if let Some(t) = e.response {
                            out.push(resp[..t.size].to_vec());
                        }
                    }
                }
            }
            Some(DatagramEvent::ConnectionEvent(ch, event)) => {
                if let Some((handle, conn)) = self.conn.as_mut()
                    && *handle == ch
                {
                    conn.handle_event(event);
                }
            }
            Some(DatagramEvent::Response(t)) => out.push(self.buf[..t.size].to_vec()),
            None => {}
        }
        self.poll(now, &mut out);
        out
    }

    fn poll(&mut self, now: Instant, out: &mut Vec<Vec<u8>>) {
        let Some((ch, conn)) = self.conn.as_mut() else {
            return;
        };
        while let Some(event) = conn.poll_endpoint_events() {
            if let Some(ev) = self.endpoint.handle_event(*ch, event) {
                conn.handle_event(ev);
            }
        }
        while let Some(event) = conn.poll() {
            match event {
                Event::Stream(StreamEvent::Opened { dir: Dir::Bi }) => {
                    while let Some(id) = conn.streams().accept(Dir::Bi) {
                        self.streams.push(id);
                    }
                }
                Event::ConnectionLost { reason } => self.lost = Some(reason),
                _ => {}
            }
        }
        for &id in &self.streams {
            let mut echoed = Vec::new();
            let mut fin = false;
            if let Ok(mut chunks) = conn.recv_stream(id).read(true) {
                loop {
                    match chunks.next(usize::MAX) {
                        Ok(Some(chunk)) => echoed.extend_from_slice(&chunk.bytes),
                        Ok(None) => {
                            fin = true;
                            break;
                        }
                        Err(_) => break,
                    }
                }
                let _ = chunks.finalize();
            }
            if !echoed.is_empty() {
                let _ = conn.send_stream(id).write(&echoed);
            }
            if fin {
                let _ = conn.send_stream(id).finish();
            }
        }
        loop {
            let mut buf = Vec::new();
            match conn.poll_transmit(now, 1, &mut buf) {
                Some(t) => out.push(buf[..t.size].to_vec()),
                None => break,
            }
        }
    }

    fn close(&mut self, now: Instant, code: u32, reason: &'static [u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if let Some((_, conn)) = self.conn.as_mut() {
            conn.close(now, VarInt::from_u32(code), Bytes::from_static(reason));
        }
        self.poll(now, &mut out);
        out
    }
}

// ── Harness ──────────────────────────────────────────────────────────

struct Pair {
    client: QuicClientConnection,
    server: EchoServer,
    client_addr: SocketAddr,
    events: Vec<TransportEvent>,
}

impl Pair {
    fn new(versions: Vec<QuicVersion>) -> Self {
        let (certs, key) = generate_self_signed();
        let server_addr: SocketAddr = "127.0.0.1:4433".parse().unwrap();
        let client_addr: SocketAddr = "127.0.0.1:50000".parse().unwrap();
        let server = EchoServer::new(server_config(certs.clone(), key), server_addr);
        let client = QuicClientConnection::connect(
            TransportConfig::with_versions(versions),
            &client_crypto(&certs),
            ServerId::new("localhost", 4433, false),
            server_addr,
            client_addr,
            Instant::now(),
        )
        .unwrap();
        Self {
            client,
            server,
            client_addr,
            events: Vec::new(),
        }
    }

    /// Shuttle datagrams both ways until neither side has anything to send.
    fn pump(&mut self) {
        for _ in 0..64 {
            let now = Instant::now();
            let mut capture = Capture::default();
            self.client.flush(now, &mut capture).unwrap();
            let mut to_client = Vec::new();
            for (dest, data) in capture.packets.drain(..) {
                assert_eq!(dest, self.server.addr);
                to_client.extend(self.server.handle_datagram(now, self.client_addr, &data));
            }
            let mut out = Vec::new();
            self.server.poll(now, &mut out);
            to_client.extend(out);
            if to_client.is_empty() && self.client.send_queue_len() == 0 {
                break;
            }
            for data in to_client {
                self.client.handle_datagram(now, &data, self.server.addr);
            }
            while let Some(event) = self.client.poll_event() {
                self.events.push(event);
            }
        }
        while let Some(event) = self.client.poll_event() {
            self.events.push(event);
        }
    }

    fn deliver(&mut self, datagrams: Vec<Vec<u8>>) {
        let now = Instant::now();
        for data in datagrams {
            self.client.handle_datagram(now, &data, self.server.addr);
        }
        while let Some(event) = self.client.poll_event() {
            self.events.push(event);
        }
    }

    fn connected() -> Self {
        let mut pair = Self::new(vec![QuicVersion::Rfc1]);
        pair.pump();
        assert!(pair.events.contains(&TransportEvent::Connected));
        pair
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[test]
fn handshake_completes() {
    let pair = Pair::connected();
    assert_eq!(pair.client.state(), ConnectionState::Established);
    assert_eq!(pair.client.version(), QuicVersion::Rfc1);
    assert_eq!(pair.client.server().host, "localhost");
}

#[test]
fn handshake_completes_on_draft29() {
    let mut pair = Pair::new(vec![QuicVersion::Draft29]);
    pair.pump();
    assert!(pair.events.contains(&TransportEvent::Connected));
    assert_eq!(pair.client.version(), QuicVersion::Draft29);
}

#[test]
fn first_flight_is_queued_on_connect() {
    let mut pair = Pair::new(vec![QuicVersion::Rfc1]);
    assert_eq!(pair.client.state(), ConnectionState::Handshaking);
    assert!(pair.client.send_queue_len() > 0);
    let (dest, data) = pair.client.poll_send().unwrap();
    assert_eq!(dest.port(), 4433);
    // Long header with version 1.
    assert_eq!(data[0] & 0x80, 0x80);
    assert_eq!(&data[1..5], &[0, 0, 0, 1]);
}

#[test]
fn blocked_writer_keeps_packets_queued() {
    let mut pair = Pair::new(vec![QuicVersion::Rfc1]);
    let queued = pair.client.send_queue_len();
    let mut capture = Capture {
        budget: Some(0),
        ..Capture::default()
    };
    let written = pair.client.flush(Instant::now(), &mut capture).unwrap();
    assert_eq!(written, 0);
    assert_eq!(pair.client.send_queue_len(), queued);
}

#[test]
fn bidi_stream_echo() {
    let mut pair = Pair::connected();
    let id = pair.client.open_bidi().unwrap().unwrap();
    assert_eq!(id, StreamId::client_bidi(0));

    let n = pair.client.stream_send(id, b"hello quic").unwrap();
    assert_eq!(n, 10);
    pair.client.stream_finish(id).unwrap();
    pair.pump();

    assert!(
        pair.events
            .contains(&TransportEvent::StreamReadable { stream: id })
    );
    let mut buf = [0u8; 64];
    let (n, fin) = pair.client.stream_recv(id, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello quic");
    assert!(fin);
}

#[test]
fn stream_ids_are_sequential() {
    let mut pair = Pair::connected();
    let a = pair.client.open_bidi().unwrap().unwrap();
    let b = pair.client.open_bidi().unwrap().unwrap();
    let u = pair.client.open_uni().unwrap().unwrap();
    assert_eq!(a.raw(), 0);
    assert_eq!(b.raw(), 4);
    assert_eq!(u, StreamId::client_uni(0));
}

#[test]
fn local_close_reaches_server() {
    let mut pair = Pair::connected();
    pair.client.close(0x100, b"closed by application");
    assert_eq!(pair.client.state(), ConnectionState::Closed);
    pair.pump();

    match pair.server.lost.as_ref() {
        Some(ConnectionError::ApplicationClosed(close)) => {
            assert_eq!(close.error_code.into_inner(), 0x100);
            assert_eq!(&close.reason[..], b"closed by application");
        }
        other => panic!("unexpected server outcome: {other:?}"),
    }
    assert!(matches!(pair.client.open_bidi(), Err(Error::ConnectionClosed)));
}

#[test]
fn peer_close_surfaces_event() {
    let mut pair = Pair::connected();
    let out = pair.server.close(Instant::now(), 0x10c, b"going away");
    pair.deliver(out);

    let closed = pair
        .events
        .iter()
        .find_map(|e| match e {
            TransportEvent::ConnectionClosed(info) => Some(info.clone()),
            _ => None,
        })
        .expect("no close event");
    assert_eq!(closed.code, CloseCode::Application(0x10c));
    assert_eq!(closed.detail, "going away");
    assert!(closed.remote);
    assert_eq!(pair.client.state(), ConnectionState::Closed);
}

#[test]
fn idle_connection_times_out() {
    let mut pair = Pair::connected();
    assert!(pair.client.poll_timeout().is_some());

    // Fire every timer in turn without delivering anything from the peer.
    for _ in 0..64 {
        let Some(deadline) = pair.client.poll_timeout() else {
            break;
        };
        pair.client.drive_timers(deadline);
        while let Some(event) = pair.client.poll_event() {
            pair.events.push(event);
        }
        if pair.client.state() == ConnectionState::Closed {
            break;
        }
    }

    let closed = pair
        .events
        .iter()
        .find_map(|e| match e {
            TransportEvent::ConnectionClosed(info) => Some(info.clone()),
            _ => None,
        })
        .expect("no close event");
    assert_eq!(closed.code, CloseCode::IdleTimeout);
    assert!(!closed.remote);
    assert_eq!(pair.client.state(), ConnectionState::Closed);
}
