//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Identities currently registered in the presence registry.
    pub online_users: usize,
    /// Envelopes waiting in the offline mailbox.
    pub buffered_envelopes: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, online_users: usize, buffered_envelopes: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        online_users,
        buffered_envelopes,
    }
}
