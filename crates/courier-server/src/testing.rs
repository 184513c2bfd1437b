//! In-process fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use courier_core::{
    Connection, ConnectionError, ConnectionHandle, ConnectionId, FrameReader, Identity,
    ManualClock, PermissionTier,
};
use courier_directory::{AccountDirectory, ConnectionConfig, SqliteDirectory, new_in_memory};
use courier_settings::RelaySettings;

use crate::context::RelayContext;

/// Records every frame sent to it.
pub(crate) struct FakeConnection {
    id: ConnectionId,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    fail_writes: AtomicBool,
    hidden_checks: AtomicUsize,
}

impl FakeConnection {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            hidden_checks: AtomicUsize::new(0),
        })
    }

    /// The same connection as a registry handle and as the test's view of it.
    pub(crate) fn handle() -> (ConnectionHandle, Arc<Self>) {
        let conn = Self::new();
        (conn.clone(), conn)
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// The next `checks` calls to `is_closed` report `true`, as if the
    /// connection had not registered yet.
    pub(crate) fn hide_from_lookups(&self, checks: usize) {
        self.hidden_checks.store(checks, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    pub(crate) fn last_json(&self) -> Value {
        self.sent_json().pop().expect("nothing sent")
    }
}

#[async_trait]
impl Connection for FakeConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn send_text(&self, frame: Arc<str>) -> Result<(), ConnectionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ConnectionError::Write("injected failure".into()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Write("closed".into()));
        }
        self.sent.lock().push(frame.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        let hidden = self
            .hidden_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        hidden || self.closed.load(Ordering::SeqCst)
    }
}

/// Replays a fixed script of frames, then reports the peer gone.
pub(crate) struct ScriptedReader {
    script: VecDeque<Result<String, ConnectionError>>,
}

impl ScriptedReader {
    pub(crate) fn new<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: frames.into_iter().map(|f| Ok(f.into())).collect(),
        }
    }

    pub(crate) fn from_results(script: Vec<Result<String, ConnectionError>>) -> Self {
        Self {
            script: script.into(),
        }
    }
}

#[async_trait]
impl FrameReader for ScriptedReader {
    async fn recv(&mut self) -> Result<String, ConnectionError> {
        self.script.pop_front().unwrap_or(Err(ConnectionError::Closed))
    }
}

/// Relay state over an in-memory directory seeded with
/// `root` (root), `admin` (admin, created by root) and `user` (normal,
/// created by admin). Every password is `pw`.
pub(crate) struct Fixture {
    pub(crate) ctx: Arc<RelayContext>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) directory: Arc<SqliteDirectory>,
    shutdown: CancellationToken,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_settings(&RelaySettings::default())
    }

    pub(crate) fn with_settings(settings: &RelaySettings) -> Self {
        let pool = new_in_memory(&ConnectionConfig::default()).unwrap();
        let directory = Arc::new(SqliteDirectory::open(pool).unwrap());
        let _ = directory.ensure_root("root", "pw").unwrap();
        let _ = directory
            .create_account(&Identity::from("root"), PermissionTier::Root, "admin", "pw")
            .unwrap();
        let _ = directory
            .create_account(&Identity::from("admin"), PermissionTier::Admin, "user", "pw")
            .unwrap();

        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ));
        let (ctx, worker) = RelayContext::new(directory.clone(), clock.clone(), settings);
        let shutdown = CancellationToken::new();
        let _ = tokio::spawn(worker.run(shutdown.clone()));

        Self {
            ctx: Arc::new(ctx),
            clock,
            directory,
            shutdown,
        }
    }
}

impl Fixture {
    /// Tier of the account if `name`/`password` currently log in.
    pub(crate) fn directory_account(&self, name: &str, password: &str) -> Option<PermissionTier> {
        self.directory
            .verify_credentials(name, password)
            .unwrap()
            .map(|account| account.tier)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Let the delivery worker catch up.
pub(crate) async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
}
