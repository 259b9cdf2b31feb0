//! HTTP + WebSocket front end of the relay.
//!
//! Routes:
//! - `GET /ws`: WebSocket; every peer is a subscriber and may push telemetry
//! - `POST /api/data`: store one reading in the history
//! - `GET /api/data`: `{"values": [...]}` from the history
//! - `GET /health`: liveness and counters
//! - anything else: the static dashboard, when configured

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use busrelay_protocol::constants::{
    HISTORY_CAPACITY, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT,
};
use busrelay_protocol::{SensorReading, unix_timestamp};

use crate::connection::{self, PingSettings};
use crate::history::HistoryStore;
use crate::hub::BroadcastHub;
use crate::{BROADCAST_QUEUE, ServerError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Dashboard files served for every path no route claims.
    pub static_dir: Option<PathBuf>,
    pub ping: PingSettings,
    pub history_capacity: usize,
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            static_dir: None,
            ping: PingSettings {
                interval: WS_PING_PERIOD,
                timeout: WS_PONG_WAIT,
            },
            history_capacity: HISTORY_CAPACITY,
            queue_capacity: BROADCAST_QUEUE,
        }
    }
}

#[derive(Clone)]
struct AppState {
    hub: Arc<BroadcastHub>,
    ping: PingSettings,
    /// Cancelled once the hub has drained, closing remaining sockets.
    sessions: CancellationToken,
}

/// The relay server. Owns the hub for its whole lifetime.
pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<BroadcastHub>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let history = Arc::new(HistoryStore::new(config.history_capacity));
        let hub = Arc::new(BroadcastHub::new(history, config.queue_capacity));
        Arc::new(Self {
            config,
            hub,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Stops accepting, drains the broadcast queue, closes every socket.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs until [`shutdown`](Self::shutdown). Failing to bind is fatal.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let host = self.config.host.as_str();
        let listener = TcpListener::bind((host, self.config.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{host}:{}", self.config.port),
                source,
            })?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!("relay server listening on {local_addr}");

        self.hub.spawn_worker();

        let sessions = CancellationToken::new();
        let state = AppState {
            hub: Arc::clone(&self.hub),
            ping: self.config.ping,
            sessions: sessions.clone(),
        };
        let app = router(state, self.config.static_dir.clone());

        let stop_accepting = {
            let cancel = self.cancel.clone();
            async move {
                cancel.cancelled().await;
                info!("server shutting down, no longer accepting connections");
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(stop_accepting)
            .await?;

        // Upgraded sockets outlive the listener: drain the hub, then close them.
        self.hub.shutdown().await;
        sessions.cancel();
        Ok(())
    }
}

fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new().route("/data", get(get_data).post(post_data));

    let app = Router::new()
        .route("/ws", get(handle_ws))
        .route("/health", get(health))
        .nest("/api", api)
        .with_state(state);

    match static_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "serving dashboard");
            app.fallback_service(ServeDir::new(dir))
        }
        None => app,
    }
}

// --- WebSocket: /ws ---

async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.max_message_size(WS_MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| {
            connection::serve_socket(socket, state.hub, state.ping, state.sessions)
        })
}

// --- REST: /api/data ---

/// A reading posted by a client; the receipt time stands in for a
/// missing timestamp.
#[derive(Debug, Deserialize)]
struct IncomingRecord {
    #[serde(flatten)]
    reading: SensorReading,
    #[serde(default)]
    timestamp: Option<f64>,
}

async fn post_data(State(state): State<AppState>, Json(body): Json<IncomingRecord>) -> Response {
    if let Err(e) = body.reading.validate() {
        warn!(error = %e, "rejecting posted reading");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": e.to_string() })),
        )
            .into_response();
    }

    let timestamp = body.timestamp.unwrap_or_else(unix_timestamp);
    state.hub.history().record(body.reading.stamped(timestamp));
    Json(json!({ "status": "ok" })).into_response()
}

async fn get_data(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "values": state.hub.history().all() }))
}

// --- GET /health ---

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "subscribers": state.hub.subscriber_count(),
        "history": state.hub.history().len(),
    }))
}
