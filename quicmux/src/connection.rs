//! HTTP/3 client connection facade.
//!
//! `HttpClientConnection` owns a [`ClientSession`] and turns transport events
//! into session calls: request stream bytes are parsed into HEADERS and DATA
//! frames, unidirectional streams go to the control stream handler, and
//! resets and closes are forwarded as they are.
//!
//! The application calls [`poll()`](HttpClientConnection::poll) (or feeds
//! events one at a time with
//! [`handle_transport_event()`](HttpClientConnection::handle_transport_event))
//! after every transport I/O step.

use std::fmt;

use bytes::{Buf, Bytes};
use quicmux_transport::{Error as TransportError, StreamId, Transport, TransportEvent};
use tracing::{trace, warn};

use crate::control::ControlStreams;
use crate::error::{Error, H3ErrorCode};
use crate::frame::{self, Frame};
use crate::session::ClientSession;
use crate::stream::{FrameBody, RecvState, ResponseDecoder, StreamRef};

/// Application protocol spoken by a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http3,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http3 => "HTTP/3",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct HttpClientConnection<T> {
    session: ClientSession<T>,
    control: ControlStreams,
    /// Scratch buffer for stream reads.
    read_buf: Vec<u8>,
}

impl<T: Transport> HttpClientConnection<T> {
    pub fn new(session: ClientSession<T>) -> Self {
        Self {
            session,
            control: ControlStreams::new(),
            read_buf: vec![0u8; 65536],
        }
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::Http3
    }

    /// Open a request stream on the session.
    pub fn new_stream(
        &mut self,
        decoder: Box<dyn ResponseDecoder>,
    ) -> Result<StreamRef<'_, T>, Error> {
        self.session.open_stream(decoder)
    }

    pub fn session(&self) -> &ClientSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut ClientSession<T> {
        &mut self.session
    }

    pub fn into_session(self) -> ClientSession<T> {
        self.session
    }

    /// Drain and handle every pending transport event. Returns how many
    /// were handled.
    pub fn poll(&mut self) -> Result<usize, Error> {
        let mut handled = 0;
        while let Some(event) = self.session.transport_mut().poll_event() {
            self.handle_transport_event(event)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Process one transport event.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Result<(), Error> {
        trace!(?event, "transport event");
        match event {
            TransportEvent::Connected => {
                self.control.open_local(&mut self.session)?;
                self.session.notify_connected();
            }
            TransportEvent::StreamOpened { stream, bidi } => {
                if bidi {
                    return Err(self.session.protocol_violation(
                        H3ErrorCode::StreamCreationError,
                        "server-initiated bidirectional stream",
                    ));
                }
                self.control.on_opened(&mut self.session, stream)?;
            }
            TransportEvent::StreamReadable { stream } => {
                if stream.is_client_initiated() && stream.is_bidi() {
                    self.read_request_stream(stream)?;
                } else {
                    self.control.on_readable(&mut self.session, stream)?;
                }
            }
            TransportEvent::StreamWritable { stream } => {
                if !self.control.on_writable(&mut self.session, stream)? {
                    self.session.on_stream_writable(stream)?;
                }
            }
            TransportEvent::StreamFinished { .. } => {}
            TransportEvent::StreamStopped { stream, error_code } => {
                if self.control.is_local(stream) {
                    return Err(self.session.protocol_violation(
                        H3ErrorCode::ClosedCriticalStream,
                        "control stream stopped",
                    ));
                }
                self.session.on_stream_reset(stream, error_code);
            }
            TransportEvent::ConnectionClosed(info) => {
                self.session.on_transport_closed(&info);
            }
        }
        Ok(())
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn read_request_stream(&mut self, id: StreamId) -> Result<(), Error> {
        let Some(mut recv) = self.session.take_recv(id) else {
            trace!(stream_id = %id, "readable on inactive request stream");
            return Ok(());
        };
        let result = self.read_and_process(id, &mut recv);
        self.session.restore_recv(id, recv);
        result
    }

    /// Read and parse one chunk at a time, so at most one read plus one
    /// bounded HEADERS frame is ever buffered.
    fn read_and_process(&mut self, id: StreamId, recv: &mut RecvState) -> Result<(), Error> {
        loop {
            let (n, fin) = match self.session.transport_mut().stream_recv(id, &mut self.read_buf) {
                Ok(read) => read,
                Err(TransportError::Reset(code)) => {
                    self.session.on_stream_reset(id, code);
                    return Ok(());
                }
                Err(e) if e.is_connection_fatal() => return Err(self.session.transport_failed(e)),
                Err(e) => {
                    trace!(stream_id = %id, error = %e, "request stream read failed");
                    return Ok(());
                }
            };
            recv.buf.extend_from_slice(&self.read_buf[..n]);
            self.process_request_frames(id, recv, fin)?;
            if fin || n == 0 || self.session.stream_entry(id).is_none() {
                return Ok(());
            }
        }
    }

    /// Deliver what `recv` holds. HEADERS frames are decoded once complete;
    /// DATA payloads are handed over as they arrive. The delivery that ends
    /// the buffer at FIN carries the end-of-stream flag.
    fn process_request_frames(
        &mut self,
        id: StreamId,
        recv: &mut RecvState,
        fin: bool,
    ) -> Result<(), Error> {
        let limit = self.session.config().max_field_section_size as u64;
        let mut fin_delivered = false;
        loop {
            if let Some(body) = recv.body {
                let n = body.remaining().min(recv.buf.len() as u64) as usize;
                if n == 0 {
                    break;
                }
                let chunk = recv.buf.split_to(n).freeze();
                recv.body = body.consume(n as u64);
                if let FrameBody::Data(_) = body {
                    let at_end = fin && recv.body.is_none() && recv.buf.is_empty();
                    self.session.on_data(id, chunk, at_end)?;
                    fin_delivered = at_end;
                }
            } else {
                let header = match frame::peek_frame_header(&recv.buf) {
                    Ok(Some(header)) => header,
                    Ok(None) => break,
                    Err(e) => return Err(self.session.escalate(e)),
                };
                match header.frame_type {
                    frame::FRAME_DATA => {
                        recv.buf.advance(header.header_len);
                        recv.body = FrameBody::Data(header.payload_len).consume(0);
                        if recv.body.is_none() {
                            let at_end = fin && recv.buf.is_empty();
                            self.session.on_data(id, Bytes::new(), at_end)?;
                            fin_delivered = at_end;
                        }
                    }
                    frame::FRAME_HEADERS => {
                        if header.payload_len > limit {
                            warn!(
                                stream_id = %id,
                                size = header.payload_len,
                                limit,
                                "response header frame too large"
                            );
                            self.session
                                .reset_stream_local(id, H3ErrorCode::ExcessiveLoad.code());
                            return Ok(());
                        }
                        let block = match frame::decode_frame(&mut recv.buf) {
                            Ok(Some(Frame::Headers(block))) => block,
                            Ok(_) => break,
                            Err(e) => return Err(self.session.escalate(e)),
                        };
                        let at_end = fin && recv.buf.is_empty();
                        let fields = self.session.decode_header_block(&block)?;
                        self.session
                            .on_header_block_complete(id, fields, at_end, block.len())?;
                        fin_delivered = at_end;
                    }
                    frame::FRAME_PUSH_PROMISE => {
                        return Err(self.session.protocol_violation(
                            H3ErrorCode::IdError,
                            "PUSH_PROMISE without MAX_PUSH_ID",
                        ));
                    }
                    frame::FRAME_SETTINGS
                    | frame::FRAME_GOAWAY
                    | frame::FRAME_CANCEL_PUSH
                    | frame::FRAME_MAX_PUSH_ID => {
                        return Err(self.session.protocol_violation(
                            H3ErrorCode::FrameUnexpected,
                            format!("frame type {:#x} on request stream", header.frame_type),
                        ));
                    }
                    _ => {
                        recv.buf.advance(header.header_len);
                        recv.body = FrameBody::Skip(header.payload_len).consume(0);
                    }
                }
            }

            // A handler may have reset or completed the stream.
            if self.session.stream_entry(id).is_none() {
                return Ok(());
            }
        }

        if fin && !fin_delivered {
            if recv.body.is_some() || !recv.buf.is_empty() {
                return Err(self
                    .session
                    .protocol_violation(H3ErrorCode::FrameError, "stream ended inside a frame"));
            }
            self.session.on_stream_fin(id)?;
        }
        Ok(())
    }
}
