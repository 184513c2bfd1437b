//! Command handlers. Each runs after the authorization gate and sends
//! exactly one reply on the session's own connection.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, error, info, warn};

use courier_core::{ConnectionHandle, Envelope, Identity, PermissionTier};
use courier_directory::{DeleteTarget, DirectoryError};

use super::{Session, SessionState};
use crate::metrics::RELAY_LOGINS_TOTAL;
use crate::protocol::{self, ErrorCode};

impl Session {
    pub(super) async fn login(&mut self, name: String, password: String) {
        let verified = self
            .ctx
            .directory_call(move |dir| dir.verify_credentials(&name, &password))
            .await;
        let account = match verified {
            Ok(Some(account)) => account,
            Ok(None) => {
                counter!(RELAY_LOGINS_TOTAL, "outcome" => "rejected").increment(1);
                self.reply_error("login", ErrorCode::Login);
                return;
            }
            Err(e) => {
                error!(error = %e, "credential check failed");
                counter!(RELAY_LOGINS_TOTAL, "outcome" => "error").increment(1);
                self.reply_error("login", ErrorCode::Login);
                return;
            }
        };
        counter!(RELAY_LOGINS_TOTAL, "outcome" => "success").increment(1);

        // Switching identity on the same connection releases the old one.
        if let SessionState::Authenticated { identity, .. } = &self.state {
            if *identity != account.identity {
                let _ = self
                    .ctx
                    .presence()
                    .unregister(identity, self.connection.id());
            }
        }

        let identity = account.identity;
        let tier = account.tier;
        self.state = SessionState::Authenticated {
            identity: identity.clone(),
            tier,
        };
        // Reply first: once registered, live messages can reach the
        // connection through the worker.
        self.reply(protocol::login_success(tier));

        let _ = self
            .ctx
            .presence()
            .register(identity.clone(), self.connection.clone());
        info!(identity = %identity, tier = %tier, "user logged in");

        let now = self.ctx.clock().now();
        let backlog = self.ctx.mailbox().drain(&identity, now);
        if !backlog.is_empty() {
            info!(identity = %identity, count = backlog.len(), "replaying buffered messages");
        }
        self.forward(backlog, &self.connection).await;
    }

    pub(super) async fn add_user(
        &self,
        caller: &Identity,
        tier: PermissionTier,
        name: String,
        password: String,
    ) {
        if name.is_empty() || password.is_empty() {
            self.reply_error("adduser", ErrorCode::MissParam);
            return;
        }
        let owner = caller.clone();
        let created = self
            .ctx
            .directory_call(move |dir| dir.create_account(&owner, tier, &name, &password))
            .await;
        match created {
            Ok(identity) => {
                info!(caller = %caller, account = %identity, "account created");
                self.reply(protocol::success("adduser"));
            }
            Err(DirectoryError::DuplicateAccount(name)) => {
                warn!(caller = %caller, account = %name, "duplicate account name");
                self.reply_error("adduser", ErrorCode::AddUser);
            }
            Err(e) => {
                error!(caller = %caller, error = %e, "account creation failed");
                self.reply_error("adduser", ErrorCode::AddUser);
            }
        }
    }

    pub(super) async fn delete_users(
        &self,
        caller: &Identity,
        tier: PermissionTier,
        users: Vec<String>,
        remove_all: bool,
    ) {
        let target = if remove_all {
            DeleteTarget::All
        } else if users.is_empty() {
            self.reply_error("deluser", ErrorCode::MissParam);
            return;
        } else {
            DeleteTarget::Named(users)
        };

        let owner = caller.clone();
        let deleted = self
            .ctx
            .directory_call(move |dir| dir.delete_accounts(&owner, tier, &target))
            .await;
        match deleted {
            Ok(removed) => {
                info!(caller = %caller, removed, "accounts deleted");
                self.reply(protocol::success("deluser"));
            }
            Err(DirectoryError::Forbidden(reason)) => {
                warn!(caller = %caller, %reason, "delete outside caller scope");
                self.reply_error("deluser", ErrorCode::DeleteUser);
            }
            Err(e) => {
                error!(caller = %caller, error = %e, "account deletion failed");
                self.reply_error("deluser", ErrorCode::DeleteUser);
            }
        }
    }

    pub(super) async fn list_users(
        &self,
        caller: &Identity,
        tier: PermissionTier,
        start: usize,
        length: Option<usize>,
    ) {
        let owner = caller.clone();
        let listed = self
            .ctx
            .directory_call(move |dir| dir.list_accounts(&owner, tier, start, length))
            .await;
        let users = listed.unwrap_or_else(|e| {
            error!(caller = %caller, error = %e, "account listing failed");
            Vec::new()
        });
        self.reply(protocol::listuser_success(&users));
    }

    /// Acknowledge to the sender, then fan the message out.
    pub(super) async fn send_message(&self, sender: &Identity, receivers: Vec<String>, msg: &str) {
        if receivers.is_empty() {
            self.reply_error("sendmsg", ErrorCode::MissParam);
            return;
        }
        self.reply(protocol::success("sendmsg"));

        let produced_at = self.ctx.clock().now();
        let payload: Arc<str> = Arc::from(protocol::recvmsg(sender, msg, produced_at));

        for receiver in receivers {
            let target = Identity::from(receiver);
            let envelope = Envelope::new(target.clone(), payload.clone(), produced_at);

            if let Some(connection) = self.ctx.presence().lookup(&target) {
                self.forward(vec![envelope], &connection).await;
                continue;
            }

            debug!(sender = %sender, receiver = %target, "receiver offline, buffering");
            self.ctx.mailbox().enqueue(envelope);

            // The receiver may have logged in (and drained) between the
            // lookup and the enqueue above.
            if let Some(connection) = self.ctx.presence().lookup(&target) {
                let now = self.ctx.clock().now();
                let late = self.ctx.mailbox().reclaim(&target, now);
                debug!(receiver = %target, count = late.len(), "receiver came online, flushing");
                self.forward(late, &connection).await;
            }
        }
    }

    /// Hand envelopes to the dispatch queue, bound for `connection`.
    async fn forward(&self, envelopes: Vec<Envelope>, connection: &ConnectionHandle) {
        for envelope in envelopes {
            let target = envelope.target().clone();
            if let Err(e) = self
                .ctx
                .dispatch()
                .enqueue(envelope.with_connection(connection.clone()))
                .await
            {
                error!(receiver = %target, error = %e, "envelope not dispatched");
            }
        }
    }
}
