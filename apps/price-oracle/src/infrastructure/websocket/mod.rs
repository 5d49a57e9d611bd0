//! Websocket JSON-RPC Transport
//!
//! Accepts websocket connections and bridges each one to a dispatcher
//! session: inbound text frames become payloads, and the session's
//! outbound queue is drained to the socket by a dedicated writer task.
//!
//! # Publisher identity
//!
//! Resolved once at upgrade time, in order:
//!
//! 1. `?publisher=<key>` query parameter
//! 2. `x-publisher-key` header
//! 3. The configured default publisher
//!
//! A session with no identity may read but every `update_price` is refused.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::dispatcher::Dispatcher;
use crate::application::services::session::SessionStream;
use crate::domain::instrument::PublisherKey;

/// Header carrying the publisher identity.
pub const PUBLISHER_HEADER: &str = "x-publisher-key";

// =============================================================================
// State
// =============================================================================

/// Shared state for websocket handlers.
#[derive(Debug, Clone)]
pub struct TransportState {
    dispatcher: Arc<Dispatcher>,
    default_publisher: Option<PublisherKey>,
    shutdown: CancellationToken,
}

impl TransportState {
    /// Create transport state.
    #[must_use]
    pub const fn new(
        dispatcher: Arc<Dispatcher>,
        default_publisher: Option<PublisherKey>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            default_publisher,
            shutdown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    publisher: Option<String>,
}

// =============================================================================
// Server
// =============================================================================

/// Websocket JSON-RPC server.
pub struct WebSocketServer {
    port: u16,
    state: TransportState,
}

impl WebSocketServer {
    /// Create a new websocket server.
    #[must_use]
    pub const fn new(port: u16, state: TransportState) -> Self {
        Self { port, state }
    }

    /// Bind the configured port and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if binding fails or the server fails.
    pub async fn run(self) -> Result<(), TransportError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Websocket server listening");
        serve(listener, self.state).await
    }
}

/// Serve websocket sessions on an already bound listener until shutdown.
///
/// # Errors
///
/// Returns `TransportError::ServerFailed` if the server fails.
pub async fn serve(listener: TcpListener, state: TransportState) -> Result<(), TransportError> {
    let shutdown = state.shutdown.clone();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| TransportError::ServerFailed(e.to_string()))?;

    tracing::info!("Websocket server stopped");
    Ok(())
}

fn router(state: TransportState) -> Router {
    Router::new()
        .route("/", get(upgrade_handler))
        .with_state(state)
}

// =============================================================================
// Connection Handling
// =============================================================================

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    State(state): State<TransportState>,
) -> impl IntoResponse {
    let publisher = resolve_publisher(
        params.publisher,
        &headers,
        state.default_publisher.as_deref(),
    );
    ws.on_upgrade(move |socket| handle_socket(socket, state, publisher))
}

fn resolve_publisher(
    query: Option<String>,
    headers: &HeaderMap,
    default: Option<&str>,
) -> Option<PublisherKey> {
    query
        .filter(|key| !key.is_empty())
        .or_else(|| {
            headers
                .get(PUBLISHER_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|key| !key.is_empty())
                .map(str::to_string)
        })
        .or_else(|| default.map(str::to_string))
}

async fn handle_socket(socket: WebSocket, state: TransportState, publisher: Option<PublisherKey>) {
    let dispatcher = state.dispatcher;
    let (session, stream) = dispatcher.open_session(publisher);
    let closed = stream.closed.clone();

    let (sink, mut inbound) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, stream, session.id()));

    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            () = state.shutdown.cancelled() => break,
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    dispatcher.handle_payload(&session, text.as_str());
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatcher.handle_payload(&session, text),
                    Err(_) => dispatcher.handle_unreadable(&session),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(session_id = session.id(), error = %e, "Websocket read failed");
                    break;
                }
            },
        }
    }

    dispatcher.close_session(&session);
    if let Err(e) = writer.await {
        tracing::warn!(session_id = session.id(), error = %e, "Writer task failed");
    }
}

/// Drain the session's outbound queue to the socket until the session closes.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut stream: SessionStream,
    session_id: u64,
) {
    loop {
        tokio::select! {
            biased;

            message = stream.messages.recv() => {
                let Some(text) = message else { break };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!(session_id, error = %e, "Websocket write failed");
                    stream.closed.cancel();
                    return;
                }
            }
            () = stream.closed.cancelled() => break,
        }
    }

    let _ = sink.send(Message::Close(None)).await;
}

// =============================================================================
// Errors
// =============================================================================

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
