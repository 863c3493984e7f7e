//! Connected-bytes transport abstraction and its TCP implementation.

use bytes::BytesMut;
use std::net::SocketAddr;
use std::ops::BitOr;
use std::sync::Arc;

use crate::channel::WriteFuture;
use crate::executor::EventBase;

mod async_socket_handler;
mod tcp_transport;

pub use async_socket_handler::AsyncSocketHandler;
pub use tcp_transport::TcpTransport;

/// Flags applied to outbound writes and closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteFlags(u8);

impl WriteFlags {
    /// No special behavior.
    pub const NONE: WriteFlags = WriteFlags(0);
    /// Close the write side of the transport after the pending data has
    /// flushed (half-close).
    pub const WRITE_SHUTDOWN: WriteFlags = WriteFlags(1);

    /// Returns true when every bit of `other` is set in `self`.
    pub fn contains(self, other: WriteFlags) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for WriteFlags {
    type Output = WriteFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        WriteFlags(self.0 | rhs.0)
    }
}

/// A connected byte-level transport bound to one [EventBase] for its entire
/// lifetime.
///
/// Submission order is preserved: write completion futures resolve in the
/// order the writes were issued.
pub trait AsyncTransport: Send + Sync {
    /// Local socket address.
    fn local_addr(&self) -> SocketAddr;
    /// Peer socket address.
    fn peer_addr(&self) -> Option<SocketAddr>;
    /// Returns false once the transport has failed or been closed.
    fn good(&self) -> bool;
    /// The event base owning this transport.
    fn event_base(&self) -> Arc<EventBase>;

    /// Enqueues a write; the returned future resolves when the transport
    /// reports completion.
    fn write_chain(&self, buf: BytesMut, flags: WriteFlags) -> WriteFuture;
    /// Shuts down the write side, leaving the read side open.
    fn shutdown_write(&self) -> WriteFuture;
    /// Closes the transport, flushing already-enqueued writes first.
    fn close_now(&self) -> WriteFuture;
    /// Closes the transport discarding state where the platform allows it.
    fn close_with_reset(&self) -> WriteFuture;
}
