//! WebSocket transport: the [`ChannelConnection`](connection::ChannelConnection)
//! write handle and the per-socket session driver.

pub mod connection;
pub mod session;
