//! Dispatch queue and delivery worker.
//!
//! Sessions enqueue envelopes; a single worker drains them in FIFO order and
//! writes each to the connection it carries, waiting a bounded time when
//! the connection's outbound buffer is full. Delivery is at-most-once: a
//! failed or timed-out write is logged and the envelope dropped.

use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_core::Envelope;

use crate::metrics::{RELAY_DELIVERY_FAILURES_TOTAL, RELAY_ENVELOPES_DELIVERED_TOTAL};

/// Errors from [`DispatchQueue::enqueue`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The delivery worker has stopped.
    #[error("dispatch queue closed")]
    Closed,
}

/// Producer side of the bounded dispatch queue.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Envelope>,
}

impl DispatchQueue {
    /// Create a queue holding up to `capacity` envelopes, and the worker
    /// that drains it.
    pub fn new(capacity: usize) -> (Self, DeliveryWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, DeliveryWorker { rx })
    }

    /// Append an envelope, waiting for space while the queue is full.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<(), DispatchError> {
        self.tx.send(envelope).await.map_err(|_| DispatchError::Closed)
    }

    /// Envelopes waiting for the worker.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// The single consumer of a [`DispatchQueue`].
pub struct DeliveryWorker {
    rx: mpsc::Receiver<Envelope>,
}

impl DeliveryWorker {
    /// Deliver envelopes until `shutdown` fires or every producer is gone.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("delivery worker started");
        loop {
            let envelope = tokio::select! {
                () = shutdown.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            deliver(&envelope).await;
        }
        info!("delivery worker stopped");
    }
}

async fn deliver(envelope: &Envelope) {
    let Some(connection) = envelope.connection() else {
        warn!(target_user = %envelope.target(), "envelope without connection discarded");
        counter!(RELAY_DELIVERY_FAILURES_TOTAL).increment(1);
        return;
    };
    match connection.deliver(envelope.payload().clone()).await {
        Ok(()) => {
            counter!(RELAY_ENVELOPES_DELIVERED_TOTAL).increment(1);
            debug!(target_user = %envelope.target(), conn_id = %connection.id(), "envelope delivered");
        }
        Err(e) => {
            counter!(RELAY_DELIVERY_FAILURES_TOTAL).increment(1);
            warn!(
                target_user = %envelope.target(),
                conn_id = %connection.id(),
                error = %e,
                "delivery failed, envelope dropped"
            );
        }
    }
}
