// ============================
// roomcast-backend/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use crate::relay::{Connection, Relay};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::SplitStream, SinkExt, StreamExt};
use roomcast_common::ServerMessage;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, warn};

/// Create the WebSocket router. The upgrade is served at `/`, where the
/// front-end dials, and at `/ws`.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the relay on `listener` until `signal` resolves, then shut the
/// relay down so every open connection is closed.
pub async fn serve<F>(listener: TcpListener, state: AppState, signal: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let relay = state.relay.clone();
    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            relay.shutdown();
        })
        .await
}

/// Handler for WebSocket connections
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.relay))
}

async fn handle_connection(socket: WebSocket, relay: Relay) {
    let (mut tx, rx) = socket.split();
    let (mut connection, mut outbox) = relay.connect();
    let conn_id = connection.id();

    // Task 1: drain the outbound queue into text frames
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let json = match encode(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!(conn_id = %conn_id, error = %e, "failed to encode outbound message");
                    continue;
                },
            };
            if tx.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        // every sender is gone: the connection was closed on our side
        let _ = tx.send(Message::Close(None)).await;
    });

    // Main task: process inbound frames until either side stops
    read_frames(&mut connection, rx, &relay).await;

    connection.close();
    drop(connection);

    let limit = relay.settings().send_timeout();
    if tokio::time::timeout(limit, &mut send_task).await.is_err() {
        send_task.abort();
    }
}

async fn read_frames(connection: &mut Connection, mut rx: SplitStream<WebSocket>, relay: &Relay) {
    let mut shutdown = relay.shutdown_signal();
    let stopped = *shutdown.borrow_and_update();
    if stopped {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            frame = rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    connection.handle_text(text.as_str()).await;
                },
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        connection.handle_text(text).await;
                    },
                    Err(e) => {
                        warn!(conn_id = %connection.id(), error = %e, "discarding non-UTF-8 binary frame");
                        metrics::counter!(crate::metrics::MESSAGE_DISCARDED).increment(1);
                    },
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}, // ping/pong are answered by axum
                Some(Err(e)) => {
                    debug!(conn_id = %connection.id(), error = %e, "transport error");
                    break;
                },
            },
        }
    }
}

/// Encode a message the way it goes out on the wire
pub fn encode(message: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
