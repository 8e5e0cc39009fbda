//! Connection handlers for the bridge server.
//!
//! Every websocket connection on `/datastore[/<path>]` gets its own
//! [`Bridge`]. Origins are not checked; any page may connect.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use avb_bridge_core::{Bridge, BridgeError, ConnectionId, HttpUpstream, Upstream};
use avb_bridge_protocol::{codec, ResourcePath, ServerMessage, DATASTORE_PREFIX};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Uri,
    response::IntoResponse,
    routing::get,
    Router,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The datastore every bridge talks to.
    pub upstream: Arc<dyn Upstream>,
    /// Server configuration.
    pub config: Config,
    /// Open connections and the resource each one bridges.
    pub connections: DashMap<ConnectionId, ResourcePath>,
}

impl AppState {
    /// Create new app state.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let upstream = HttpUpstream::new(config.upstream.url.clone())
            .context("Failed to create datastore client")?
            .with_update_timeout(config.update_timeout());

        Ok(Self {
            upstream: Arc::new(upstream),
            config,
            connections: DashMap::new(),
        })
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(DATASTORE_PREFIX, get(ws_handler))
        .route(&format!("{DATASTORE_PREFIX}/"), get(ws_handler))
        .route(&format!("{DATASTORE_PREFIX}/*path"), get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = build_router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Server listening at http://{}", addr);
    info!("WebSocket endpoint: ws://{}{}[/<path>]", addr, DATASTORE_PREFIX);
    info!("Bridging datastore at {}", config.upstream.url);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connections.len(),
        "upstream": state.upstream.base_url(),
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    uri: Uri,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let target = uri.path().to_string();
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, target, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, target: String, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let mut bridge = Bridge::new(state.upstream.clone(), state.config.bridge_config());
    let connection_id = bridge.connection_id().clone();

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();
    if let Err(e) = bridge.open(&target, outbound_tx) {
        warn!(connection = %connection_id, target = %target, error = %e, "Failed to open bridge");
        metrics::record_error("open");
        return;
    }

    state
        .connections
        .insert(connection_id.clone(), bridge.path().cloned().unwrap_or_default());

    let (mut sender, mut receiver) = socket.split();

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Datastore changes for this client
            Some(message) = outbound_rx.recv() => {
                let Some(frame) = outbound_frame(&connection_id, &message) else {
                    continue;
                };
                if sender.send(frame).await.is_err() {
                    break;
                }
            }

            // The poll task ended without being asked to
            result = bridge.finished() => {
                match result {
                    Ok(()) => debug!(connection = %connection_id, "Datastore loop stopped"),
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "Datastore loop terminated - closing connection");
                        metrics::record_error("poll");
                    }
                }
                break;
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");
                        let start = Instant::now();
                        let result = bridge.on_message(&text).await;
                        metrics::record_update_latency(start.elapsed().as_secs_f64());
                        if !keep_open(&connection_id, result) {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        metrics::record_message(data.len(), "inbound");
                        let start = Instant::now();
                        let result = bridge.on_binary(&data).await;
                        metrics::record_update_latency(start.elapsed().as_secs_f64());
                        if !keep_open(&connection_id, result) {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Flush what is already queued, such as a notice for the update that
    // ended the connection
    while let Ok(message) = outbound_rx.try_recv() {
        let Some(frame) = outbound_frame(&connection_id, &message) else {
            continue;
        };
        if sender.send(frame).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;

    let shutdown = bridge.close().await;
    state.connections.remove(&connection_id);

    debug!(connection = %connection_id, shutdown = ?shutdown, "WebSocket disconnected");
}

/// Encode a message for the client, recording it as outbound traffic.
fn outbound_frame(connection_id: &ConnectionId, message: &ServerMessage) -> Option<Message> {
    match codec::encode(message) {
        Ok(text) => {
            metrics::record_message(text.len(), "outbound");
            Some(Message::Text(text))
        }
        Err(e) => {
            error!(connection = %connection_id, error = %e, "Failed to encode message");
            metrics::record_error("encode");
            None
        }
    }
}

/// Decide whether a connection survives the result of an update.
fn keep_open(connection_id: &ConnectionId, result: Result<(), BridgeError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e @ BridgeError::UpdateRejected { .. }) => {
            debug!(connection = %connection_id, error = %e, "Update not applied");
            metrics::record_update_rejected();
            true
        }
        Err(e) => {
            warn!(connection = %connection_id, error = %e, "Closing connection");
            metrics::record_error("update");
            false
        }
    }
}
