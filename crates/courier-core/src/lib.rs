//! # courier-core
//!
//! Foundation types shared by every Courier crate.
//!
//! - **Branded IDs**: [`Identity`] (a user name) and [`ConnectionId`]
//! - **Tiers**: [`PermissionTier`] with `Root < Admin < Normal` ordering by privilege
//! - **Envelopes**: [`Envelope`], one addressed message moving through delivery
//! - **Connections**: the [`Connection`] write handle and [`FrameReader`] read half
//! - **Time**: [`Clock`] so retention windows can be tested deterministically
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod connection;
pub mod envelope;
pub mod ids;
pub mod logging;
pub mod tier;
pub mod time;

pub use connection::{Connection, ConnectionError, ConnectionHandle, FrameReader};
pub use envelope::Envelope;
pub use ids::{ConnectionId, Identity};
pub use tier::PermissionTier;
pub use time::{Clock, ManualClock, SystemClock};
