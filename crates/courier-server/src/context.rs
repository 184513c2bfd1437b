//! Shared relay state handed to every session.

use std::sync::Arc;

use courier_core::Clock;
use courier_directory::{AccountDirectory, DirectoryError};
use courier_settings::RelaySettings;

use crate::dispatch::{DeliveryWorker, DispatchQueue};
use crate::mailbox::Mailbox;
use crate::presence::PresenceRegistry;

/// Everything a session needs beyond its own connection.
pub struct RelayContext {
    presence: PresenceRegistry,
    mailbox: Mailbox,
    dispatch: DispatchQueue,
    directory: Arc<dyn AccountDirectory>,
    clock: Arc<dyn Clock>,
    max_consecutive_errors: u32,
}

impl RelayContext {
    /// Build the shared state and the delivery worker that drains its queue.
    ///
    /// The caller owns the worker and must spawn it.
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        clock: Arc<dyn Clock>,
        settings: &RelaySettings,
    ) -> (Self, DeliveryWorker) {
        let (dispatch, worker) = DispatchQueue::new(settings.dispatch_capacity);
        let ctx = Self {
            presence: PresenceRegistry::new(),
            mailbox: Mailbox::new(settings.retention_window()),
            dispatch,
            directory,
            clock,
            max_consecutive_errors: settings.max_consecutive_read_errors.max(1),
        };
        (ctx, worker)
    }

    /// Who is online.
    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Buffered messages for offline identities.
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// Producer side of the delivery pipeline.
    pub fn dispatch(&self) -> &DispatchQueue {
        &self.dispatch
    }

    /// Time source for envelope stamps and retention checks.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Consecutive read/decode failures tolerated before a session closes.
    pub fn max_consecutive_errors(&self) -> u32 {
        self.max_consecutive_errors
    }

    /// Run a directory call on the blocking pool.
    pub async fn directory_call<T, F>(&self, f: F) -> Result<T, DirectoryError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn AccountDirectory) -> Result<T, DirectoryError> + Send + 'static,
    {
        let directory = Arc::clone(&self.directory);
        tokio::task::spawn_blocking(move || f(directory.as_ref()))
            .await
            .map_err(|e| DirectoryError::Internal(format!("directory task failed: {e}")))?
    }
}
