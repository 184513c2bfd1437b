//! # courier-server
//!
//! The Courier relay: authenticated users exchange messages over WebSocket
//! text frames, and messages for offline users wait in a time-bounded
//! mailbox until they log in.
//!
//! - [`protocol`]: JSON frame decoding and reply construction
//! - [`session`]: per-connection state machine and command handlers
//! - [`presence`]: identity to live connection registry
//! - [`mailbox`]: per-identity buffer for offline recipients
//! - [`dispatch`]: bounded delivery queue and its single worker
//! - [`server`]: axum router with `/ws`, `/health` and `/metrics`
//! - [`shutdown`]: cancellation token plus tracked background tasks

#![deny(unsafe_code)]

pub mod context;
pub mod dispatch;
pub mod health;
pub mod mailbox;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod websocket;

#[cfg(test)]
mod testing;

pub use context::RelayContext;
pub use server::CourierServer;
pub use session::{CloseReason, Session, SessionState};
pub use shutdown::ShutdownCoordinator;
