//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use courier_core::{Connection, ConnectionError, ConnectionId};

/// Write handle of a connected WebSocket client.
///
/// Frames go into a bounded channel drained by the connection's outbound
/// task. [`send_text`](Connection::send_text) never waits;
/// [`deliver`](Connection::deliver) waits up to `write_timeout` for space.
/// After one timed-out delivery the connection counts as stalled and
/// further deliveries stop waiting until a frame fits again. Closing cancels
/// the connection token, which stops both the outbound task and the reader.
pub struct ChannelConnection {
    id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    write_timeout: Duration,
    stalled: AtomicBool,
    closed: CancellationToken,
    connected_at: Instant,
    dropped_messages: AtomicU64,
}

impl ChannelConnection {
    /// Create a new connection around the outbound channel.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>, write_timeout: Duration) -> Self {
        Self {
            id,
            tx,
            write_timeout,
            stalled: AtomicBool::new(false),
            closed: CancellationToken::new(),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Token cancelled once the connection is closed.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Total frames dropped because the channel was full or gone.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Whether the last waiting delivery timed out.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_text(&self, frame: Arc<str>) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Write("connection closed".into()));
        }
        self.tx.try_send(frame).map_err(|e| {
            self.record_drop();
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    ConnectionError::Write("outbound buffer full".into())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    ConnectionError::Write("outbound task gone".into())
                }
            }
        })
    }

    async fn deliver(&self, frame: Arc<str>) -> Result<(), ConnectionError> {
        if self.is_stalled() {
            let sent = self.send_text(frame);
            if sent.is_ok() {
                self.stalled.store(false, Ordering::Relaxed);
            }
            return sent;
        }
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Write("connection closed".into()));
        }
        let sent = tokio::select! {
            () = self.closed.cancelled() => {
                return Err(ConnectionError::Write("connection closed".into()));
            }
            sent = self.tx.send_timeout(frame, self.write_timeout) => sent,
        };
        sent.map_err(|e| {
            self.record_drop();
            match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    self.stalled.store(true, Ordering::Relaxed);
                    ConnectionError::Write(format!(
                        "peer not reading for {:?}",
                        self.write_timeout
                    ))
                }
                mpsc::error::SendTimeoutError::Closed(_) => {
                    ConnectionError::Write("outbound task gone".into())
                }
            }
        })
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }
}
