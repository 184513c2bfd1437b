//! `CourierServer`: axum HTTP + WebSocket front end for the relay.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use courier_core::{Clock, ConnectionId};
use courier_directory::AccountDirectory;
use courier_settings::{RelaySettings, ServerSettings};

use crate::context::RelayContext;
use crate::dispatch::DeliveryWorker;
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay state shared by every session.
    pub ctx: Arc<RelayContext>,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
    /// When the server started.
    pub start_time: Instant,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
    /// Per-connection outbound frame buffer.
    pub outbound_buffer: usize,
    /// Bounded wait for outbound buffer space during delivery.
    pub write_timeout: Duration,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
}

/// The Courier relay server.
pub struct CourierServer {
    settings: ServerSettings,
    sweep_interval: Duration,
    ctx: Arc<RelayContext>,
    worker: Mutex<Option<DeliveryWorker>>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl CourierServer {
    /// Create a new server. Nothing runs until [`listen`](Self::listen).
    pub fn new(
        settings: ServerSettings,
        relay: &RelaySettings,
        directory: Arc<dyn AccountDirectory>,
        clock: Arc<dyn Clock>,
        metrics: PrometheusHandle,
    ) -> Self {
        let (ctx, worker) = RelayContext::new(directory, clock, relay);
        Self {
            settings,
            sweep_interval: relay.mailbox_sweep_interval(),
            ctx: Arc::new(ctx),
            worker: Mutex::new(Some(worker)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            shutdown: self.shutdown.token(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            outbound_buffer: self.settings.outbound_buffer,
            write_timeout: self.settings.write_timeout(),
            max_message_size: self.settings.max_message_size,
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(state)
    }

    /// Bind the listener and start serving.
    ///
    /// Spawns the delivery worker, the mailbox sweeper and the HTTP server;
    /// all three are tracked by the shutdown coordinator. Returns the bound
    /// address (useful with port `0`). Fails on a second call.
    pub async fn listen(&self) -> io::Result<SocketAddr> {
        let worker = self
            .worker
            .lock()
            .take()
            .ok_or_else(|| io::Error::other("server is already listening"))?;

        let bind = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = TcpListener::bind(&bind).await?;
        let addr = listener.local_addr()?;

        let token = self.shutdown.token();
        self.shutdown.track(tokio::spawn(worker.run(token.clone())));
        self.shutdown.track(tokio::spawn(sweep_mailbox(
            self.ctx.clone(),
            self.sweep_interval,
            token.clone(),
        )));

        let app = self.router();
        self.shutdown.track(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server exited with error");
            }
        }));

        info!(%addr, "courier relay listening");
        Ok(addr)
    }

    /// Relay state shared by every session.
    pub fn context(&self) -> &Arc<RelayContext> {
        &self.ctx
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// Periodically drop mailbox entries older than the retention window.
async fn sweep_mailbox(ctx: Arc<RelayContext>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately.
    let _ = ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let removed = ctx.mailbox().prune(ctx.clock().now());
                if removed > 0 {
                    debug!(removed, "swept expired mailbox entries");
                }
            }
        }
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let conn_id = ConnectionId::new();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| {
            run_ws_session(
                socket,
                conn_id,
                state.ctx,
                state.outbound_buffer,
                state.write_timeout,
                state.shutdown,
            )
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.ctx.presence().len(),
        state.ctx.mailbox().buffered(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}
