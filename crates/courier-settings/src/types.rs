//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`: missing
//! fields in the user file get their compiled default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9700 },
///   "relay": { "retentionWindowSecs": 600 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Network listener settings.
    pub server: ServerSettings,
    /// Session engine, delivery and mailbox tuning.
    pub relay: RelaySettings,
    /// Account directory storage.
    pub directory: DirectorySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl CourierSettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.relay.dispatch_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.dispatchCapacity must be greater than 0".into(),
            ));
        }
        if self.relay.max_consecutive_read_errors == 0 {
            return Err(SettingsError::InvalidValue(
                "relay.maxConsecutiveReadErrors must be greater than 0".into(),
            ));
        }
        if self.server.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundBuffer must be greater than 0".into(),
            ));
        }
        if self.directory.root_name.is_empty() {
            return Err(SettingsError::InvalidValue(
                "directory.rootName must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Network listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` = auto-assign).
    pub port: u16,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Frames buffered per connection.
    pub outbound_buffer: usize,
    /// How long message delivery waits for a full outbound buffer before
    /// dropping the message.
    pub write_timeout_ms: u64,
}

impl ServerSettings {
    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9600,
            max_message_size: 64 * 1024,
            outbound_buffer: 256,
            write_timeout_ms: 5_000,
        }
    }
}

/// Relay core tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// How long an offline message stays deliverable.
    pub retention_window_secs: u64,
    /// Consecutive read/decode failures before a session is closed.
    pub max_consecutive_read_errors: u32,
    /// Dispatch queue capacity in envelopes.
    pub dispatch_capacity: usize,
    /// Interval of the background sweep of expired mailbox entries.
    pub mailbox_sweep_interval_secs: u64,
}

impl RelaySettings {
    /// Retention window as a [`Duration`].
    pub fn retention_window(&self) -> Duration {
        Duration::from_secs(self.retention_window_secs)
    }

    /// Sweep interval as a [`Duration`] (at least one second).
    pub fn mailbox_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.mailbox_sweep_interval_secs.max(1))
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            retention_window_secs: 3600,
            max_consecutive_read_errors: 20,
            dispatch_capacity: 1024,
            mailbox_sweep_interval_secs: 300,
        }
    }
}

/// Account directory storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DirectorySettings {
    /// `SQLite` path; relative paths resolve under `~/.courier`.
    pub db_path: String,
    /// Name of the root account.
    pub root_name: String,
    /// When set, the root account is created at startup if missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_password: Option<String>,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            db_path: "courier.db".to_string(),
            root_name: "root".to_string(),
            root_password: None,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
