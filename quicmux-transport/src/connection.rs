use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use quinn_proto::{ConnectionHandle, DatagramEvent, Dir, Event, StreamEvent, VarInt};
use tracing::{debug, trace};

use crate::config::{QuicVersion, ServerId, TransportConfig};
use crate::crypto::CryptoConfigFactory;
use crate::error::Error;
use crate::event::{CloseInfo, TransportEvent};
use crate::id::StreamId;
use crate::transport::{ConnectionState, Transport};
use crate::writer::{PacketWriter, WriteStatus};

/// A sans-IO QUIC client connection to a single server.
///
/// Wraps a client-only [`quinn_proto::Endpoint`] holding exactly one
/// connection and exposes it through the [`Transport`] trait. Callers feed
/// incoming datagrams, drive timers, and flush outgoing packets to a
/// [`PacketWriter`].
///
/// # Usage
///
/// 1. Feed incoming UDP datagrams via [`handle_datagram`](Self::handle_datagram).
/// 2. Drive the connection timer via [`drive_timers`](Self::drive_timers).
/// 3. Poll transport events via [`Transport::poll_event`].
/// 4. Push outgoing packets via [`flush`](Self::flush).
pub struct QuicClientConnection {
    endpoint: quinn_proto::Endpoint,
    handle: ConnectionHandle,
    /// `None` once the connection is drained.
    conn: Option<quinn_proto::Connection>,
    state: ConnectionState,
    server: ServerId,
    version: QuicVersion,
    local_addr: SocketAddr,
    events: VecDeque<TransportEvent>,
    send_queue: VecDeque<OutgoingPacket>,
    /// Scratch buffer for `poll_transmit`.
    transmit_buf: Vec<u8>,
    /// Scratch buffer for `endpoint.handle()` responses.
    response_buf: Vec<u8>,
    send_queue_capacity: usize,
}

struct OutgoingPacket {
    destination: SocketAddr,
    data: Vec<u8>,
}

impl QuicClientConnection {
    /// Start a handshake with `peer`, identified as `server`.
    ///
    /// The first Initial flight is queued immediately; call
    /// [`flush`](Self::flush) to put it on the wire.
    pub fn connect(
        config: TransportConfig,
        crypto: &dyn CryptoConfigFactory,
        server: ServerId,
        peer: SocketAddr,
        local_addr: SocketAddr,
        now: Instant,
    ) -> Result<Self, Error> {
        let version = config.initial_version();
        let mut endpoint_config = config.endpoint_config;
        endpoint_config.supported_versions(
            config
                .supported_versions
                .iter()
                .map(|v| v.wire())
                .collect(),
        );
        let mut endpoint = quinn_proto::Endpoint::new(
            Arc::new(endpoint_config),
            None,
            config.allow_mtud,
            config.rng_seed,
        );

        let mut client_config = crypto.client_config(&server, version)?;
        client_config.version(version.wire());
        if let Some(transport) = config.transport {
            client_config.transport_config(transport);
        }

        let (handle, conn) = endpoint.connect(now, client_config, peer, &server.host)?;
        debug!(server = %server, %peer, %version, "quic handshake started");

        let mut this = Self {
            endpoint,
            handle,
            conn: Some(conn),
            state: ConnectionState::Handshaking,
            server,
            version,
            local_addr,
            events: VecDeque::new(),
            send_queue: VecDeque::new(),
            transmit_buf: Vec::with_capacity(1500),
            response_buf: Vec::with_capacity(1500),
            send_queue_capacity: config.send_queue_capacity,
        };
        this.drain_transmits(now);
        Ok(this)
    }

    /// Feed an incoming UDP datagram to the QUIC state machine.
    pub fn handle_datagram(&mut self, now: Instant, data: &[u8], peer: SocketAddr) {
        let data = BytesMut::from(data);
        let event = self.endpoint.handle(
            now,
            peer,
            Some(self.local_addr.ip()),
            None, // ECN not yet supported
            data,
            &mut self.response_buf,
        );

        match event {
            Some(DatagramEvent::ConnectionEvent(ch, event)) => {
                if ch == self.handle
                    && let Some(conn) = self.conn.as_mut()
                {
                    conn.handle_event(event);
                    self.poll_connection(now);
                }
            }
            Some(DatagramEvent::NewConnection(incoming)) => {
                // Client-only endpoint: inbound handshakes are never accepted.
                self.endpoint.ignore(incoming);
            }
            Some(DatagramEvent::Response(transmit)) => {
                // Stateless response (e.g. stateless reset).
                let data = self.response_buf[..transmit.size].to_vec();
                self.queue_packet(transmit.destination, data);
            }
            None => {}
        }
    }

    /// Fire the connection timer if it has expired.
    pub fn drive_timers(&mut self, now: Instant) {
        let expired = self
            .conn
            .as_mut()
            .and_then(|c| c.poll_timeout())
            .is_some_and(|timeout| timeout <= now);
        if expired {
            if let Some(conn) = self.conn.as_mut() {
                conn.handle_timeout(now);
            }
            self.poll_connection(now);
        }
    }

    /// Next instant at which [`drive_timers`](Self::drive_timers) has work.
    pub fn poll_timeout(&mut self) -> Option<Instant> {
        self.conn.as_mut().and_then(|c| c.poll_timeout())
    }

    /// Poll the next outgoing UDP packet.
    pub fn poll_send(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.send_queue
            .pop_front()
            .map(|pkt| (pkt.destination, pkt.data))
    }

    /// Generate pending packets and hand them to `writer`.
    ///
    /// Stops at the first [`WriteStatus::Blocked`], keeping that packet at the
    /// head of the queue. Returns the number of packets written.
    pub fn flush(&mut self, now: Instant, writer: &mut dyn PacketWriter) -> Result<usize, Error> {
        self.poll_connection(now);
        let mut written = 0;
        while let Some(pkt) = self.send_queue.pop_front() {
            match writer.write_packet(pkt.destination, &pkt.data)? {
                WriteStatus::Written => written += 1,
                WriteStatus::Blocked => {
                    self.send_queue.push_front(pkt);
                    break;
                }
            }
        }
        Ok(written)
    }

    pub fn server(&self) -> &ServerId {
        &self.server
    }

    pub fn version(&self) -> QuicVersion {
        self.version
    }

    /// Peer address, while the connection exists.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(|c| c.remote_address())
    }

    /// Number of pending outgoing packets.
    pub fn send_queue_len(&self) -> usize {
        self.send_queue.len()
    }

    // ── Internal helpers ─────────────────────────────────────────────

    fn conn_mut(&mut self) -> Result<&mut quinn_proto::Connection, Error> {
        if self.state == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }
        self.conn.as_mut().ok_or(Error::ConnectionClosed)
    }

    /// Drain all pending transmits from the connection into the send queue.
    fn drain_transmits(&mut self, now: Instant) {
        loop {
            self.transmit_buf.clear();
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            match conn.poll_transmit(now, 1, &mut self.transmit_buf) {
                Some(t) => {
                    let data = self.transmit_buf[..t.size].to_vec();
                    self.queue_packet(t.destination, data);
                }
                None => break,
            }
        }
    }

    /// Drain endpoint events and application events from the connection.
    fn poll_connection(&mut self, now: Instant) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        // 1. Endpoint events (connection ID updates, drained notification).
        while let Some(event) = conn.poll_endpoint_events() {
            if let Some(conn_event) = self.endpoint.handle_event(self.handle, event) {
                conn.handle_event(conn_event);
            }
        }

        // 2. Application events.
        while let Some(event) = conn.poll() {
            match event {
                Event::Connected => {
                    self.state = ConnectionState::Established;
                    self.events.push_back(TransportEvent::Connected);
                }
                Event::ConnectionLost { reason } => {
                    debug!(server = %self.server, %reason, "quic connection lost");
                    self.state = ConnectionState::Closed;
                    self.events
                        .push_back(TransportEvent::ConnectionClosed(CloseInfo::from(&reason)));
                }
                Event::Stream(stream_event) => match stream_event {
                    StreamEvent::Opened { dir } => {
                        while let Some(stream) = conn.streams().accept(dir) {
                            self.events.push_back(TransportEvent::StreamOpened {
                                stream: stream.into(),
                                bidi: dir == Dir::Bi,
                            });
                        }
                    }
                    StreamEvent::Readable { id } => {
                        self.events
                            .push_back(TransportEvent::StreamReadable { stream: id.into() });
                    }
                    StreamEvent::Writable { id } => {
                        self.events
                            .push_back(TransportEvent::StreamWritable { stream: id.into() });
                    }
                    StreamEvent::Finished { id } => {
                        self.events
                            .push_back(TransportEvent::StreamFinished { stream: id.into() });
                    }
                    StreamEvent::Stopped { id, error_code } => {
                        self.events.push_back(TransportEvent::StreamStopped {
                            stream: id.into(),
                            error_code: error_code.into_inner(),
                        });
                    }
                    StreamEvent::Available { .. } => {
                        // Stream credit is observed through open_bidi/open_uni.
                    }
                },
                Event::HandshakeDataReady | Event::DatagramReceived | Event::DatagramsUnblocked => {
                    // Not surfaced.
                }
            }
        }

        // 3. Transmits generated by event processing.
        self.drain_transmits(now);

        // 4. Drop the connection once it is drained.
        if self.conn.as_ref().is_some_and(|c| c.is_drained()) {
            trace!(server = %self.server, "quic connection drained");
            self.conn = None;
            self.state = ConnectionState::Closed;
        }
    }

    fn queue_packet(&mut self, destination: SocketAddr, data: Vec<u8>) {
        if self.send_queue.len() < self.send_queue_capacity {
            self.send_queue
                .push_back(OutgoingPacket { destination, data });
        }
        // Drop excess packets; QUIC retransmits.
    }
}

fn varint(code: u64) -> VarInt {
    VarInt::from_u64(code).unwrap_or(VarInt::MAX)
}

impl Transport for QuicClientConnection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn open_bidi(&mut self) -> Result<Option<StreamId>, Error> {
        let conn = self.conn_mut()?;
        Ok(conn.streams().open(Dir::Bi).map(StreamId::from))
    }

    fn open_uni(&mut self) -> Result<Option<StreamId>, Error> {
        let conn = self.conn_mut()?;
        Ok(conn.streams().open(Dir::Uni).map(StreamId::from))
    }

    fn stream_send(&mut self, stream: StreamId, data: &[u8]) -> Result<usize, Error> {
        let conn = self.conn_mut()?;
        match conn.send_stream(stream.into()).write(data) {
            Ok(n) => Ok(n),
            Err(quinn_proto::WriteError::Blocked) => Ok(0),
            Err(quinn_proto::WriteError::Stopped(code)) => Err(Error::Stopped(code.into_inner())),
            Err(quinn_proto::WriteError::ClosedStream) => Err(Error::ClosedStream),
            #[allow(unreachable_patterns)]
            Err(e) => Err(Error::Write(e)),
        }
    }

    fn stream_recv(&mut self, stream: StreamId, buf: &mut [u8]) -> Result<(usize, bool), Error> {
        let conn = self.conn_mut()?;
        let mut recv = conn.recv_stream(stream.into());
        let mut chunks = recv.read(true)?;
        let mut total = 0;
        let mut finished = false;

        while total < buf.len() {
            match chunks.next(buf.len() - total) {
                Ok(Some(chunk)) => {
                    let len = chunk.bytes.len();
                    buf[total..total + len].copy_from_slice(&chunk.bytes);
                    total += len;
                }
                Ok(None) => {
                    finished = true;
                    break;
                }
                Err(quinn_proto::ReadError::Blocked) => break,
                Err(quinn_proto::ReadError::Reset(code)) => {
                    let _ = chunks.finalize();
                    return Err(Error::Reset(code.into_inner()));
                }
                #[allow(unreachable_patterns)]
                Err(e) => {
                    let _ = chunks.finalize();
                    return Err(Error::Read(e));
                }
            }
        }
        let _ = chunks.finalize();
        Ok((total, finished))
    }

    fn stream_finish(&mut self, stream: StreamId) -> Result<(), Error> {
        let conn = self.conn_mut()?;
        conn.send_stream(stream.into())
            .finish()
            .map_err(|_| Error::ClosedStream)
    }

    fn reset_stream(&mut self, stream: StreamId, error_code: u64) -> Result<(), Error> {
        let conn = self.conn_mut()?;
        conn.send_stream(stream.into())
            .reset(varint(error_code))
            .map_err(|_| Error::ClosedStream)
    }

    fn stop_sending(&mut self, stream: StreamId, error_code: u64) -> Result<(), Error> {
        let conn = self.conn_mut()?;
        conn.recv_stream(stream.into())
            .stop(varint(error_code))
            .map_err(|_| Error::ClosedStream)
    }

    fn close(&mut self, error_code: u64, reason: &[u8]) {
        let now = Instant::now();
        if let Some(conn) = self.conn.as_mut()
            && self.state != ConnectionState::Closed
        {
            conn.close(now, varint(error_code), Bytes::copy_from_slice(reason));
            self.state = ConnectionState::Closed;
            self.drain_transmits(now);
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}
