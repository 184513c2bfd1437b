//! Presence registry: which identity is online, and on which connection.

use std::collections::HashMap;

use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info};

use courier_core::{ConnectionHandle, ConnectionId, Identity};

use crate::metrics::RELAY_SESSIONS_SUPERSEDED_TOTAL;

/// Process-wide `Identity → Connection` map.
///
/// At most one connection is registered per identity. All operations take
/// the same lock, held only for the map mutation (closing a connection is a
/// signal, not I/O).
#[derive(Default)]
pub struct PresenceRegistry {
    entries: Mutex<HashMap<Identity, ConnectionHandle>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `connection` for `identity`, closing any other connection
    /// previously registered for it.
    ///
    /// Returns `true` when a different connection was superseded.
    pub fn register(&self, identity: Identity, connection: ConnectionHandle) -> bool {
        let mut entries = self.entries.lock();
        let previous = entries.insert(identity.clone(), connection.clone());
        match previous {
            Some(old) if old.id() != connection.id() => {
                old.close();
                drop(entries);
                counter!(RELAY_SESSIONS_SUPERSEDED_TOTAL).increment(1);
                info!(
                    identity = %identity,
                    old_conn = %old.id(),
                    new_conn = %connection.id(),
                    "connection superseded"
                );
                true
            }
            _ => false,
        }
    }

    /// The live connection for `identity`, if any.
    ///
    /// A connection whose peer is already gone but whose session has not yet
    /// unregistered is treated as absent.
    pub fn lookup(&self, identity: &Identity) -> Option<ConnectionHandle> {
        self.entries
            .lock()
            .get(identity)
            .filter(|conn| !conn.is_closed())
            .cloned()
    }

    /// Remove `identity` only if it still points at `connection`.
    ///
    /// Returns `true` when the entry was removed. A stale session cleaning
    /// up after being superseded leaves the newer registration in place.
    pub fn unregister(&self, identity: &Identity, connection: &ConnectionId) -> bool {
        let mut entries = self.entries.lock();
        let owned = entries
            .get(identity)
            .is_some_and(|current| current.id() == connection);
        if owned {
            let _ = entries.remove(identity);
        } else {
            debug!(identity = %identity, conn_id = %connection, "unregister skipped, entry not owned");
        }
        owned
    }

    /// Number of online identities.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nobody is online.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeConnection;
    use courier_core::Connection;

    fn id(name: &str) -> Identity {
        Identity::from(name)
    }

    #[test]
    fn register_then_lookup() {
        let registry = PresenceRegistry::new();
        let (conn, _peer) = FakeConnection::handle();
        assert!(!registry.register(id("alice"), conn.clone()));

        let found = registry.lookup(&id("alice")).unwrap();
        assert_eq!(found.id(), conn.id());
        assert!(registry.lookup(&id("bob")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn second_registration_closes_first() {
        let registry = PresenceRegistry::new();
        let (first, first_peer) = FakeConnection::handle();
        let (second, second_peer) = FakeConnection::handle();

        let _ = registry.register(id("alice"), first);
        assert!(registry.register(id("alice"), second.clone()));

        assert!(first_peer.is_closed());
        assert!(!second_peer.is_closed());
        assert_eq!(registry.lookup(&id("alice")).unwrap().id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn re_registering_same_connection_does_not_close_it() {
        let registry = PresenceRegistry::new();
        let (conn, peer) = FakeConnection::handle();
        let _ = registry.register(id("alice"), conn.clone());
        assert!(!registry.register(id("alice"), conn));
        assert!(!peer.is_closed());
    }

    #[test]
    fn stale_unregister_keeps_newer_entry() {
        let registry = PresenceRegistry::new();
        let (old, _p1) = FakeConnection::handle();
        let (new, _p2) = FakeConnection::handle();
        let old_id = old.id().clone();

        let _ = registry.register(id("alice"), old);
        let _ = registry.register(id("alice"), new.clone());

        assert!(!registry.unregister(&id("alice"), &old_id));
        assert_eq!(registry.lookup(&id("alice")).unwrap().id(), new.id());

        assert!(registry.unregister(&id("alice"), new.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn closed_connection_is_not_online() {
        let registry = PresenceRegistry::new();
        let (conn, _peer) = FakeConnection::handle();
        let _ = registry.register(id("alice"), conn.clone());
        conn.close();
        assert!(registry.lookup(&id("alice")).is_none());
    }
}
