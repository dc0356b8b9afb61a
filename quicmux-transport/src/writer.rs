//! Outgoing datagram sink.

use std::io;
use std::net::{SocketAddr, UdpSocket};

/// Result of handing one datagram to a [`PacketWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// The datagram was accepted.
    Written,
    /// The writer cannot take more right now; retry the same datagram later.
    Blocked,
}

/// Where a connection's outgoing UDP datagrams go.
///
/// Injected into [`QuicClientConnection::flush`](crate::QuicClientConnection::flush)
/// so tests can capture packets in memory instead of using a socket.
pub trait PacketWriter {
    fn write_packet(&mut self, destination: SocketAddr, data: &[u8]) -> io::Result<WriteStatus>;
}

impl PacketWriter for UdpSocket {
    fn write_packet(&mut self, destination: SocketAddr, data: &[u8]) -> io::Result<WriteStatus> {
        match self.send_to(data, destination) {
            Ok(_) => Ok(WriteStatus::Written),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(WriteStatus::Blocked),
            Err(e) => Err(e),
        }
    }
}

impl<W: PacketWriter + ?Sized> PacketWriter for &mut W {
    fn write_packet(&mut self, destination: SocketAddr, data: &[u8]) -> io::Result<WriteStatus> {
        (**self).write_packet(destination, data)
    }
}
