//! Message envelopes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::connection::ConnectionHandle;
use crate::ids::Identity;

/// One addressed, serialized message unit.
///
/// Envelopes are immutable. Attaching a connection consumes the envelope and
/// returns a new one, so an envelope is only ever held by one structure at a
/// time (the dispatch queue or a mailbox slot).
#[derive(Clone)]
pub struct Envelope {
    target: Identity,
    payload: Arc<str>,
    connection: Option<ConnectionHandle>,
    produced_at: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope with no live connection attached.
    pub fn new(target: Identity, payload: Arc<str>, produced_at: DateTime<Utc>) -> Self {
        Self {
            target,
            payload,
            connection: None,
            produced_at,
        }
    }

    /// Attach the connection the envelope should be written to.
    #[must_use]
    pub fn with_connection(self, connection: ConnectionHandle) -> Self {
        Self {
            connection: Some(connection),
            ..self
        }
    }

    /// Receiving identity.
    pub fn target(&self) -> &Identity {
        &self.target
    }

    /// Serialized frame text.
    pub fn payload(&self) -> &Arc<str> {
        &self.payload
    }

    /// Connection to write to, if one is attached.
    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref()
    }

    /// When the message was produced.
    pub fn produced_at(&self) -> DateTime<Utc> {
        self.produced_at
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("target", &self.target)
            .field("bytes", &self.payload.len())
            .field("connection", &self.connection.as_ref().map(|c| c.id().clone()))
            .field("produced_at", &self.produced_at)
            .finish()
    }
}
