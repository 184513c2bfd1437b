//! Offline mailbox: envelopes buffered for identities that are not online.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tracing::debug;

use courier_core::{Envelope, Identity};

use crate::metrics::{RELAY_MAILBOX_BUFFERED, RELAY_MAILBOX_EXPIRED_TOTAL};

type Bucket = BTreeMap<DateTime<Utc>, Vec<Envelope>>;

#[derive(Default)]
struct Slots {
    buckets: HashMap<Identity, Bucket>,
    total: usize,
}

impl Slots {
    fn publish(&self) {
        #[allow(clippy::cast_precision_loss)]
        gauge!(RELAY_MAILBOX_BUFFERED).set(self.total as f64);
    }
}

/// Per-identity, time-ordered buffer of undelivered envelopes.
///
/// Envelopes are keyed by their production time. Nothing older than the
/// retention window is ever handed out.
pub struct Mailbox {
    retention: chrono::Duration,
    slots: Mutex<Slots>,
}

impl Mailbox {
    /// Create an empty mailbox with the given retention window.
    pub fn new(retention: Duration) -> Self {
        Self {
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
            slots: Mutex::new(Slots::default()),
        }
    }

    /// Buffer `envelope` for its target.
    pub fn enqueue(&self, envelope: Envelope) {
        let mut slots = self.slots.lock();
        slots
            .buckets
            .entry(envelope.target().clone())
            .or_default()
            .entry(envelope.produced_at())
            .or_default()
            .push(envelope);
        slots.total += 1;
        slots.publish();
    }

    /// Remove every envelope buffered for `identity` and return those
    /// produced within `[now - retention, now)`, oldest first.
    ///
    /// The identity's bucket is gone afterwards, whatever was returned.
    pub fn drain(&self, identity: &Identity, now: DateTime<Utc>) -> Vec<Envelope> {
        self.take(identity, now, false)
    }

    /// Like [`drain`](Self::drain), but also returns envelopes stamped
    /// exactly `now`.
    ///
    /// Used when a sender finds the receiver came online while it was
    /// buffering: the envelope it just stored carries the current time.
    pub fn reclaim(&self, identity: &Identity, now: DateTime<Utc>) -> Vec<Envelope> {
        self.take(identity, now, true)
    }

    fn take(&self, identity: &Identity, now: DateTime<Utc>, include_now: bool) -> Vec<Envelope> {
        let mut slots = self.slots.lock();
        let Some(bucket) = slots.buckets.remove(identity) else {
            return Vec::new();
        };

        let oldest = self.cutoff(now);
        let mut kept = Vec::new();
        let mut expired = 0usize;
        let mut removed = 0usize;
        for (at, envelopes) in bucket {
            removed += envelopes.len();
            if at < oldest {
                expired += envelopes.len();
            } else if at < now || (include_now && at == now) {
                kept.extend(envelopes);
            }
        }
        slots.total -= removed;
        slots.publish();
        drop(slots);

        if expired > 0 {
            counter!(RELAY_MAILBOX_EXPIRED_TOTAL).increment(expired as u64);
        }
        debug!(
            identity = %identity,
            delivered = kept.len(),
            discarded = removed - kept.len(),
            "mailbox drained"
        );
        kept
    }

    /// Discard every envelope older than the retention window, for all
    /// identities. Returns how many were discarded.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let oldest = self.cutoff(now);
        let mut slots = self.slots.lock();
        let mut expired = 0usize;
        slots.buckets.retain(|_, bucket| {
            let fresh = bucket.split_off(&oldest);
            expired += bucket.values().map(Vec::len).sum::<usize>();
            *bucket = fresh;
            !bucket.is_empty()
        });
        slots.total -= expired;
        slots.publish();
        drop(slots);

        if expired > 0 {
            counter!(RELAY_MAILBOX_EXPIRED_TOTAL).increment(expired as u64);
        }
        expired
    }

    /// Envelopes currently buffered, across all identities.
    pub fn buffered(&self) -> usize {
        self.slots.lock().total
    }

    /// Envelopes currently buffered for `identity`.
    pub fn buffered_for(&self, identity: &Identity) -> usize {
        self.slots
            .lock()
            .buckets
            .get(identity)
            .map_or(0, |bucket| bucket.values().map(Vec::len).sum())
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
