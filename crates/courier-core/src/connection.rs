//! Transport connection abstraction.
//!
//! A live connection is split in two halves:
//!
//! - [`Connection`]: the shareable write handle. It is stored in the
//!   presence registry and carried by envelopes, so it is reference-counted
//!   ([`ConnectionHandle`]). Replies use the non-waiting
//!   [`send_text`](Connection::send_text); the delivery worker uses
//!   [`deliver`](Connection::deliver), which may wait a bounded time for a
//!   slow peer.
//! - [`FrameReader`]: the read half, owned exclusively by the session that
//!   accepted the connection.
//!
//! Closing is a single idempotent operation on the write handle; once closed,
//! the paired reader yields [`ConnectionError::Closed`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::ids::ConnectionId;

/// Errors surfaced by a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The peer closed the connection, or it was closed locally.
    #[error("connection closed")]
    Closed,
    /// A transient read failure; the connection may still be usable.
    #[error("read error: {0}")]
    Read(String),
    /// A write could not be queued (peer stalled or gone).
    #[error("write error: {0}")]
    Write(String),
}

/// Write half of a live connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Identifier of this connection.
    fn id(&self) -> &ConnectionId;

    /// Queue one text frame for the peer without waiting.
    fn send_text(&self, frame: Arc<str>) -> Result<(), ConnectionError>;

    /// Queue one text frame, waiting for buffer space if the implementation
    /// buffers. The wait must be bounded. Defaults to
    /// [`send_text`](Self::send_text).
    async fn deliver(&self, frame: Arc<str>) -> Result<(), ConnectionError> {
        self.send_text(frame)
    }

    /// Terminate the connection. Calling this more than once is a no-op.
    fn close(&self);

    /// Whether [`close`](Self::close) has been called or the peer is gone.
    fn is_closed(&self) -> bool;
}

/// Shared handle to a connection's write half.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Read half of a live connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next text frame.
    async fn recv(&mut self) -> Result<String, ConnectionError>;
}
