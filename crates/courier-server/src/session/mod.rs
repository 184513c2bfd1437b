//! Session engine: one instance per live connection.
//!
//! Owns the read loop, decodes frames, applies the authorization gate and
//! runs the command handlers in [`commands`]. Replies only ever go to the
//! session's own connection; everything addressed to other users goes
//! through the dispatch queue or the offline mailbox.

mod commands;

use std::sync::Arc;

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use courier_core::{ConnectionError, ConnectionHandle, FrameReader, Identity, PermissionTier};

use crate::context::RelayContext;
use crate::metrics::{RELAY_COMMANDS_TOTAL, RELAY_PROTOCOL_ERRORS_TOTAL};
use crate::protocol::{self, Command, ErrorCode};

/// Authentication state of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Only `login` is accepted.
    Unauthenticated,
    /// Logged in; the tier is fixed for the identity's lifetime on this
    /// session.
    Authenticated {
        /// Who is logged in.
        identity: Identity,
        /// Their tier, as returned at login.
        tier: PermissionTier,
    },
    /// The read loop has ended and cleanup has run.
    Closed,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed, or the connection was closed locally (for example
    /// because the same identity logged in elsewhere).
    Closed,
    /// Too many consecutive read or decode failures.
    TooManyErrors,
    /// The server is shutting down.
    Shutdown,
}

/// Per-connection state.
pub struct Session {
    ctx: Arc<RelayContext>,
    connection: ConnectionHandle,
    state: SessionState,
    consecutive_errors: u32,
}

enum Step {
    Continue,
    Close(CloseReason),
}

impl Session {
    /// A fresh, unauthenticated session on `connection`.
    pub fn new(ctx: Arc<RelayContext>, connection: ConnectionHandle) -> Self {
        Self {
            ctx,
            connection,
            state: SessionState::Unauthenticated,
            consecutive_errors: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Read and handle frames until the connection ends, then clean up.
    #[instrument(skip_all, fields(conn_id = %self.connection.id()))]
    pub async fn run<R: FrameReader>(
        mut self,
        mut reader: R,
        shutdown: CancellationToken,
    ) -> CloseReason {
        let reason = loop {
            let next = tokio::select! {
                () = shutdown.cancelled() => break CloseReason::Shutdown,
                next = reader.recv() => next,
            };
            let step = match next {
                Ok(frame) => self.handle_frame(&frame).await,
                Err(ConnectionError::Closed) => Step::Close(CloseReason::Closed),
                Err(e) => {
                    debug!(error = %e, "transient read error");
                    self.record_error()
                }
            };
            if let Step::Close(reason) = step {
                break reason;
            }
        };
        self.cleanup(reason);
        reason
    }

    async fn handle_frame(&mut self, frame: &str) -> Step {
        let command = match protocol::decode_frame(frame) {
            Ok(command) => command,
            Err(e) if e.is_parse_error() => {
                let step = self.record_error();
                if matches!(step, Step::Continue) {
                    self.reply_error(&e.command, e.code);
                }
                return step;
            }
            Err(e) => {
                self.consecutive_errors = 0;
                self.reply_error(&e.command, e.code);
                return Step::Continue;
            }
        };
        self.consecutive_errors = 0;
        counter!(RELAY_COMMANDS_TOTAL, "command" => command.name()).increment(1);
        self.dispatch(command).await;
        Step::Continue
    }

    /// Count one consecutive failure; close once the limit is reached.
    fn record_error(&mut self) -> Step {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.ctx.max_consecutive_errors() {
            warn!(
                errors = self.consecutive_errors,
                "too many consecutive errors, closing"
            );
            Step::Close(CloseReason::TooManyErrors)
        } else {
            Step::Continue
        }
    }

    async fn dispatch(&mut self, command: Command) {
        let name = command.name();
        match command {
            Command::Login { name, password } => self.login(name, password).await,
            Command::AddUser { name: account, password } => {
                if let Some((identity, tier)) = self.authorize(name, true) {
                    self.add_user(&identity, tier, account, password).await;
                }
            }
            Command::DelUser { users, remove_all } => {
                if let Some((identity, tier)) = self.authorize(name, true) {
                    self.delete_users(&identity, tier, users, remove_all).await;
                }
            }
            Command::ListUser { start, length } => {
                if let Some((identity, tier)) = self.authorize(name, false) {
                    self.list_users(&identity, tier, start, length).await;
                }
            }
            Command::SendMsg { receivers, msg } => {
                if let Some((identity, _)) = self.authorize(name, false) {
                    self.send_message(&identity, receivers, &msg).await;
                }
            }
        }
    }

    /// The authorization gate. Replies `PERMISSION_ERR` and returns `None`
    /// when the session is not logged in, or when `manage` is set and the
    /// tier cannot manage accounts.
    fn authorize(&self, command: &str, manage: bool) -> Option<(Identity, PermissionTier)> {
        match &self.state {
            SessionState::Authenticated { identity, tier }
                if !manage || tier.can_manage_accounts() =>
            {
                Some((identity.clone(), *tier))
            }
            _ => {
                self.reply_error(command, ErrorCode::Permission);
                None
            }
        }
    }

    fn reply(&self, frame: String) {
        if let Err(e) = self.connection.send_text(Arc::from(frame)) {
            warn!(error = %e, "reply not sent");
        }
    }

    fn reply_error(&self, command: &str, code: ErrorCode) {
        counter!(RELAY_PROTOCOL_ERRORS_TOTAL, "code" => code.label()).increment(1);
        debug!(command, code = code.code(), "error reply");
        self.reply(protocol::error(command, code));
    }

    fn cleanup(&mut self, reason: CloseReason) {
        if let SessionState::Authenticated { identity, .. } = &self.state {
            let removed = self
                .ctx
                .presence()
                .unregister(identity, self.connection.id());
            info!(identity = %identity, removed, ?reason, "session ended");
        } else {
            info!(?reason, "session ended before login");
        }
        self.connection.close();
        self.state = SessionState::Closed;
    }
}
