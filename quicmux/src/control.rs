//! HTTP/3 unidirectional streams: our control stream and the peer's control
//! and QPACK streams (RFC 9114 Section 6.2).

use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use quicmux_transport::{Error as TransportError, StreamId, Transport};
use tracing::{debug, trace};

use crate::error::{Error, H3ErrorCode};
use crate::frame::{self, Frame};
use crate::session::ClientSession;

const STREAM_TYPE_CONTROL: u64 = 0x00;
const STREAM_TYPE_PUSH: u64 = 0x01;
const STREAM_TYPE_QPACK_ENCODER: u64 = 0x02;
const STREAM_TYPE_QPACK_DECODER: u64 = 0x03;

/// Type of a peer unidirectional stream, from its leading varint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniStreamKind {
    Control,
    Push,
    QpackEncoder,
    QpackDecoder,
    /// Reserved or extension type; the stream is ignored.
    Unknown(u64),
}

impl UniStreamKind {
    pub fn from_type(stream_type: u64) -> Self {
        match stream_type {
            STREAM_TYPE_CONTROL => Self::Control,
            STREAM_TYPE_PUSH => Self::Push,
            STREAM_TYPE_QPACK_ENCODER => Self::QpackEncoder,
            STREAM_TYPE_QPACK_DECODER => Self::QpackDecoder,
            other => Self::Unknown(other),
        }
    }
}

/// What a read pass found at the end of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    Open,
    Finished,
    Reset(u64),
}

/// Largest control stream frame payload buffered whole. Longer unknown
/// frames are discarded as they arrive; longer known frames close the
/// connection.
const MAX_CONTROL_FRAME_LEN: u64 = 16 * 1024;

/// One read from `id` into `into`: `(bytes_read, outcome)`.
fn read_some<T: Transport>(
    transport: &mut T,
    read_buf: &mut [u8],
    id: StreamId,
    into: &mut BytesMut,
) -> Result<(usize, ReadOutcome), TransportError> {
    match transport.stream_recv(id, read_buf) {
        Ok((n, fin)) => {
            into.extend_from_slice(&read_buf[..n]);
            let outcome = if fin {
                ReadOutcome::Finished
            } else {
                ReadOutcome::Open
            };
            Ok((n, outcome))
        }
        Err(TransportError::Reset(code)) => Ok((0, ReadOutcome::Reset(code))),
        Err(e) if e.is_connection_fatal() => Err(e),
        Err(e) => {
            trace!(stream_id = %id, error = %e, "uni stream read failed");
            Ok((0, ReadOutcome::Open))
        }
    }
}

/// Read everything available on `id`, keeping at most one read in `into`.
fn drain_available<T: Transport>(
    transport: &mut T,
    read_buf: &mut [u8],
    id: StreamId,
    into: &mut BytesMut,
) -> Result<ReadOutcome, TransportError> {
    loop {
        into.clear();
        let (n, outcome) = read_some(transport, read_buf, id, into)?;
        if n == 0 || outcome != ReadOutcome::Open {
            return Ok(outcome);
        }
    }
}

pub(crate) struct ControlStreams {
    /// Our control stream. Never finished.
    local: Option<StreamId>,
    /// Control stream bytes the transport has not taken yet.
    local_pending: BytesMut,
    peer: Option<StreamId>,
    peer_settings_seen: bool,
    qpack_encoder: Option<StreamId>,
    qpack_decoder: Option<StreamId>,
    /// Peer uni streams whose type varint has not fully arrived.
    pending: HashMap<StreamId, BytesMut>,
    /// Unparsed bytes from the peer control stream.
    control_buf: BytesMut,
    /// Payload bytes of an oversized unknown control frame still to discard.
    control_skip: u64,
    read_buf: Vec<u8>,
}

impl ControlStreams {
    pub(crate) fn new() -> Self {
        Self {
            local: None,
            local_pending: BytesMut::new(),
            peer: None,
            peer_settings_seen: false,
            qpack_encoder: None,
            qpack_decoder: None,
            pending: HashMap::new(),
            control_buf: BytesMut::new(),
            control_skip: 0,
            read_buf: vec![0u8; 16 * 1024],
        }
    }

    pub(crate) fn is_local(&self, id: StreamId) -> bool {
        self.local == Some(id)
    }

    /// Open our control stream and queue the stream type and SETTINGS.
    pub(crate) fn open_local<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
    ) -> Result<(), Error> {
        if self.local.is_some() {
            return Ok(());
        }
        let id = match session.transport_mut().open_uni() {
            Ok(Some(id)) => id,
            Ok(None) => return Err(Error::ResourceExhausted("cannot open control stream")),
            Err(e) => return Err(session.transport_failed(e)),
        };
        self.local = Some(id);
        frame::put_varint(&mut self.local_pending, STREAM_TYPE_CONTROL);
        Frame::Settings(session.config().settings.clone()).encode(&mut self.local_pending);
        debug!(stream_id = %id, "control stream opened");
        self.flush_local(session)
    }

    /// Push queued control stream bytes. Returns false for other streams.
    pub(crate) fn on_writable<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
        id: StreamId,
    ) -> Result<bool, Error> {
        if !self.is_local(id) {
            return Ok(false);
        }
        self.flush_local(session)?;
        Ok(true)
    }

    fn flush_local<T: Transport>(&mut self, session: &mut ClientSession<T>) -> Result<(), Error> {
        let Some(id) = self.local else {
            return Ok(());
        };
        if self.local_pending.is_empty() {
            return Ok(());
        }
        match session.transport_mut().stream_send(id, &self.local_pending) {
            Ok(n) => {
                let _ = self.local_pending.split_to(n.min(self.local_pending.len()));
                Ok(())
            }
            Err(TransportError::Stopped(_) | TransportError::Reset(_)) => Err(session
                .protocol_violation(H3ErrorCode::ClosedCriticalStream, "control stream stopped")),
            Err(e) => Err(session.transport_failed(e)),
        }
    }

    pub(crate) fn on_opened<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
        id: StreamId,
    ) -> Result<(), Error> {
        self.pending.entry(id).or_default();
        self.identify(session, id)
    }

    pub(crate) fn on_readable<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
        id: StreamId,
    ) -> Result<(), Error> {
        if self.pending.contains_key(&id) {
            return self.identify(session, id);
        }
        if self.peer == Some(id) {
            return self.read_control(session, id);
        }
        if self.qpack_encoder == Some(id) || self.qpack_decoder == Some(id) {
            return self.drain_qpack(session, id);
        }
        trace!(stream_id = %id, "readable on ignored uni stream");
        Ok(())
    }

    /// Read the stream type varint and route the stream.
    fn identify<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
        id: StreamId,
    ) -> Result<(), Error> {
        let Some(mut buf) = self.pending.remove(&id) else {
            return Ok(());
        };
        let (stream_type, len, outcome) = loop {
            let (n, outcome) = read_some(session.transport_mut(), &mut self.read_buf, id, &mut buf)
                .map_err(|e| session.transport_failed(e))?;
            if let Some((stream_type, len)) = frame::peek_varint(&buf) {
                break (stream_type, len, outcome);
            }
            if outcome == ReadOutcome::Open && n == 0 {
                self.pending.insert(id, buf);
            } else if outcome != ReadOutcome::Open {
                trace!(stream_id = %id, "uni stream ended before its type");
            } else {
                continue;
            }
            return Ok(());
        };
        let rest = buf.split_off(len);

        let kind = UniStreamKind::from_type(stream_type);
        trace!(stream_id = %id, ?kind, "peer uni stream");
        match kind {
            UniStreamKind::Control => {
                if self.peer.is_some() {
                    return Err(session.protocol_violation(
                        H3ErrorCode::StreamCreationError,
                        "second control stream",
                    ));
                }
                self.peer = Some(id);
                self.control_buf.extend_from_slice(&rest);
                self.process_control_frames(session)?;
                if outcome == ReadOutcome::Open {
                    return self.read_control(session, id);
                }
                self.check_critical_outcome(session, outcome, "control stream closed")
            }
            UniStreamKind::Push => Err(session.protocol_violation(
                H3ErrorCode::IdError,
                "push stream without MAX_PUSH_ID",
            )),
            UniStreamKind::QpackEncoder | UniStreamKind::QpackDecoder => {
                let slot = if kind == UniStreamKind::QpackEncoder {
                    &mut self.qpack_encoder
                } else {
                    &mut self.qpack_decoder
                };
                if slot.is_some() {
                    return Err(session.protocol_violation(
                        H3ErrorCode::StreamCreationError,
                        "duplicate QPACK stream",
                    ));
                }
                *slot = Some(id);
                if outcome == ReadOutcome::Open {
                    return self.drain_qpack(session, id);
                }
                self.check_critical_outcome(session, outcome, "QPACK stream closed")
            }
            UniStreamKind::Unknown(stream_type) => {
                trace!(stream_id = %id, stream_type, "ignoring unknown uni stream");
                if outcome == ReadOutcome::Open
                    && let Err(e) = session
                        .transport_mut()
                        .stop_sending(id, H3ErrorCode::StreamCreationError.code())
                {
                    trace!(stream_id = %id, error = %e, "stop_sending failed");
                }
                Ok(())
            }
        }
    }

    fn read_control<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
        id: StreamId,
    ) -> Result<(), Error> {
        loop {
            let (n, outcome) = read_some(
                session.transport_mut(),
                &mut self.read_buf,
                id,
                &mut self.control_buf,
            )
            .map_err(|e| session.transport_failed(e))?;
            self.process_control_frames(session)?;
            if n == 0 || outcome != ReadOutcome::Open {
                return self.check_critical_outcome(session, outcome, "control stream closed");
            }
        }
    }

    /// Dynamic table instructions are not supported, so QPACK stream
    /// contents are discarded.
    fn drain_qpack<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
        id: StreamId,
    ) -> Result<(), Error> {
        let mut sink = BytesMut::new();
        let outcome = drain_available(session.transport_mut(), &mut self.read_buf, id, &mut sink)
            .map_err(|e| session.transport_failed(e))?;
        self.check_critical_outcome(session, outcome, "QPACK stream closed")
    }

    fn check_critical_outcome<T: Transport>(
        &self,
        session: &mut ClientSession<T>,
        outcome: ReadOutcome,
        detail: &'static str,
    ) -> Result<(), Error> {
        match outcome {
            ReadOutcome::Open => Ok(()),
            ReadOutcome::Finished | ReadOutcome::Reset(_) => {
                Err(session.protocol_violation(H3ErrorCode::ClosedCriticalStream, detail))
            }
        }
    }

    fn process_control_frames<T: Transport>(
        &mut self,
        session: &mut ClientSession<T>,
    ) -> Result<(), Error> {
        loop {
            if self.control_skip > 0 {
                let n = self.control_skip.min(self.control_buf.len() as u64);
                if n == 0 {
                    return Ok(());
                }
                self.control_buf.advance(n as usize);
                self.control_skip -= n;
                continue;
            }
            let header = match frame::peek_frame_header(&self.control_buf) {
                Ok(Some(header)) => header,
                Ok(None) => return Ok(()),
                Err(e) => return Err(session.escalate(e)),
            };
            if !self.peer_settings_seen && header.frame_type != frame::FRAME_SETTINGS {
                return Err(session.protocol_violation(
                    H3ErrorCode::MissingSettings,
                    "first control frame is not SETTINGS",
                ));
            }
            match header.frame_type {
                frame::FRAME_DATA
                | frame::FRAME_HEADERS
                | frame::FRAME_PUSH_PROMISE
                | frame::FRAME_MAX_PUSH_ID => {
                    return Err(session.protocol_violation(
                        H3ErrorCode::FrameUnexpected,
                        format!("frame type {:#x} on control stream", header.frame_type),
                    ));
                }
                frame::FRAME_SETTINGS | frame::FRAME_GOAWAY | frame::FRAME_CANCEL_PUSH => {
                    if header.payload_len > MAX_CONTROL_FRAME_LEN {
                        return Err(session.protocol_violation(
                            H3ErrorCode::ExcessiveLoad,
                            format!("control frame of {} bytes", header.payload_len),
                        ));
                    }
                }
                _ if header.payload_len > MAX_CONTROL_FRAME_LEN => {
                    trace!(frame_type = header.frame_type, "skipping large control frame");
                    self.control_buf.advance(header.header_len);
                    self.control_skip = header.payload_len;
                    continue;
                }
                _ => {}
            }

            let frame = match frame::decode_frame(&mut self.control_buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(()),
                Err(e) => return Err(session.escalate(e)),
            };
            match frame {
                Frame::Settings(settings) => {
                    if self.peer_settings_seen {
                        return Err(session
                            .protocol_violation(H3ErrorCode::FrameUnexpected, "duplicate SETTINGS"));
                    }
                    self.peer_settings_seen = true;
                    session.on_peer_settings(settings);
                }
                Frame::GoAway(last_stream_id) => session.on_go_away(last_stream_id)?,
                Frame::CancelPush(_) => {
                    return Err(session.protocol_violation(
                        H3ErrorCode::IdError,
                        "CANCEL_PUSH without MAX_PUSH_ID",
                    ));
                }
                _ => {}
            }
        }
    }
}
