//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use courier_core::{ConnectionError, ConnectionHandle, ConnectionId, FrameReader};

use super::connection::ChannelConnection;
use crate::context::RelayContext;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::session::Session;

/// How long the outbound task may take to flush after the session ends.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Run the session engine for a freshly upgraded socket.
///
/// 1. Splits the socket and spawns the outbound forwarder
/// 2. Runs the session read loop until the peer leaves, the connection is
///    closed locally, or the server shuts down
/// 3. Waits briefly for queued frames to flush, then cleans up
#[instrument(skip_all, fields(conn_id = %conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn_id: ConnectionId,
    ctx: Arc<RelayContext>,
    outbound_buffer: usize,
    write_timeout: Duration,
    shutdown: CancellationToken,
) {
    let (ws_tx, ws_rx) = ws.split();
    let (send_tx, send_rx) = mpsc::channel::<Arc<str>>(outbound_buffer.max(1));
    let connection = Arc::new(ChannelConnection::new(conn_id, send_tx, write_timeout));
    let closed = connection.closed_token();

    let connection_start = std::time::Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut outbound = tokio::spawn(forward_outbound(ws_tx, send_rx, closed.clone()));

    let reader = WsFrameReader {
        stream: ws_rx,
        closed,
    };
    let handle: ConnectionHandle = connection.clone();
    let reason = Session::new(ctx, handle).run(reader, shutdown).await;

    if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        debug!("outbound task did not finish in time, aborting");
        outbound.abort();
    }

    info!(?reason, dropped = connection.drop_count(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Drain the outbound channel into the socket until the connection closes.
///
/// Frames already queued when the close arrives are still written, followed
/// by a Close frame.
async fn forward_outbound(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<str>>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            frame = send_rx.recv() => match frame {
                Some(text) => {
                    if ws_tx.send(text_message(&text)).await.is_err() {
                        closed.cancel();
                        return;
                    }
                }
                None => break,
            },
        }
    }

    while let Ok(text) = send_rx.try_recv() {
        if ws_tx.send(text_message(&text)).await.is_err() {
            break;
        }
    }
    let _ = ws_tx.send(Message::Close(None)).await;
    let _ = ws_tx.close().await;
    closed.cancel();
}

fn text_message(text: &str) -> Message {
    Message::Text(text.to_owned().into())
}

/// Read half of an upgraded socket.
pub struct WsFrameReader {
    stream: SplitStream<WebSocket>,
    closed: CancellationToken,
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn recv(&mut self) -> Result<String, ConnectionError> {
        loop {
            let next = tokio::select! {
                () = self.closed.cancelled() => return Err(ConnectionError::Closed),
                next = self.stream.next() => next,
            };
            match next {
                None | Some(Ok(Message::Close(_))) => return Err(ConnectionError::Closed),
                Some(Err(e)) => return Err(ConnectionError::Read(e.to_string())),
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                // Some clients send JSON as binary frames.
                Some(Ok(Message::Binary(data))) => {
                    return std::str::from_utf8(&data).map(str::to_owned).map_err(|_| {
                        ConnectionError::Read(format!("non-UTF-8 binary frame ({} bytes)", data.len()))
                    });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            }
        }
    }
}
