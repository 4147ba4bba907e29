//! `RelayServer`: axum HTTP + WebSocket gateway in front of a [`Coordinator`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusHandle;
use roomcast_hub::{Coordinator, LinkState};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health;
use crate::metrics::{BROKER_LINK_UP, WS_REJECTED_TOTAL};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::run_session;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Room membership and broadcast.
    pub coordinator: Coordinator,
    /// Gateway configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown signalling.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Open WebSocket sessions.
    pub active: Arc<AtomicUsize>,
}

/// One WebSocket slot under the connection limit. Released on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .ok()
            .map(|_| Self(Arc::clone(active)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The gateway.
pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    /// Create a gateway over `coordinator`. The coordinator's supervisor is
    /// started and stopped by the caller.
    pub fn new(config: ServerConfig, coordinator: Coordinator) -> Self {
        Self {
            state: AppState {
                coordinator,
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                metrics: None,
                active: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve in the background until [`ShutdownCoordinator::shutdown`].
    ///
    /// Returns the bound address and the serve task. A second task mirrors the
    /// broker link state into the `broker_link_up` gauge.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "roomcast gateway listening");

        let app = self.router();
        let token = self.state.shutdown.token();
        let _ = tokio::spawn(watch_link(self.state.coordinator.clone(), token.clone()));

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "gateway stopped with error");
            }
        });
        Ok((addr, handle))
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Gateway configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Open WebSocket sessions.
    pub fn connection_count(&self) -> usize {
        self.state.active.load(Ordering::Acquire)
    }
}

async fn watch_link(coordinator: Coordinator, cancel: tokio_util::sync::CancellationToken) {
    let mut rx = coordinator.watch_link_state();
    loop {
        let up = *rx.borrow_and_update() == LinkState::Listening;
        gauge!(BROKER_LINK_UP).set(if up { 1.0 } else { 0.0 });
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = rx.changed() => if changed.is_err() { break },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    room: Option<String>,
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Some(slot) = ConnectionSlot::acquire(&state.active, state.config.max_connections) else {
        counter!(WS_REJECTED_TOTAL).increment(1);
        warn!(
            limit = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            run_session(socket, state, query.room).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Response {
    let coordinator = &state.coordinator;
    let resp = health::health_check(
        state.start_time,
        state.active.load(Ordering::Acquire),
        coordinator.registry().room_count(),
        coordinator.link_state(),
        coordinator.backplane().broker_name(),
    );
    let status = if resp.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(resp)).into_response()
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
