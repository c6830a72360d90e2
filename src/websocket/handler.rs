use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::auth::AuthError;
use crate::models::{ClientMessage, DocumentId, ServerMessage};
use crate::services::auth_service::get_auth_token;
use crate::websocket::msg_content_handler::handle_content_message;
use crate::websocket::msg_cursor_handler::handle_cursor_message;
use crate::websocket::msg_ping_handler::handle_ping_message;
use crate::ws::connctx::{evicted, ConnectionHandle, ConnectionId, EvictionWatch, CLOSE_INVALID_TOKEN};
use crate::ws::registry::SessionRegistry;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Authenticating,
    Joined,
    Closing,
    Closed,
}

struct Connection {
    id: ConnectionId,
    document_id: DocumentId,
    phase: Phase,
}

impl Connection {
    fn new(document_id: DocumentId) -> Self {
        Self { id: ConnectionId::new(), document_id, phase: Phase::Connecting }
    }

    fn advance(&mut self, next: Phase) {
        debug!(
            connection_id = %self.id,
            document_id = self.document_id,
            from = ?self.phase,
            to = ?next,
            "Connection phase change"
        );
        self.phase = next;
    }
}

/// Holds a user's registration for the lifetime of its connection loop.
/// Dropping it releases the session, whether the loop ended cleanly,
/// errored, or was cancelled.
struct SessionLease {
    registry: Arc<SessionRegistry>,
    user_id: String,
    connection_id: ConnectionId,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if self.registry.release(&self.user_id, self.connection_id) {
            info!(user_id = %self.user_id, connection_id = %self.connection_id, "Session released");
        } else {
            debug!(user_id = %self.user_id, connection_id = %self.connection_id, "Session already gone");
        }
    }
}

/// WebSocket handler
///
/// The credential comes from the `token` query parameter, falling back to
/// the Authorization header or the `auth_token` cookie.
pub async fn websocket_handler(
    Path(document_id): Path<DocumentId>,
    Query(params): Query<ConnectParams>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    info!("New WebSocket connection attempt for document {}", document_id);
    let credential = match params.token.filter(|t| !t.is_empty()) {
        Some(token) => Ok(token),
        None => get_auth_token(&headers),
    };
    ws.on_upgrade(move |socket| handle_socket(socket, document_id, credential, app_state))
}

/// Handle WebSocket connection
async fn handle_socket(
    mut socket: WebSocket,
    document_id: DocumentId,
    credential: Result<String, AuthError>,
    app_state: Arc<AppState>,
) {
    let mut conn = Connection::new(document_id);
    conn.advance(Phase::Authenticating);

    let identity = match credential.and_then(|c| app_state.verifier.verify(&c)) {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Rejecting connection for document {}: {}", document_id, e);
            let close = Message::Close(Some(CloseFrame {
                code: CLOSE_INVALID_TOKEN,
                reason: "Invalid token".into(),
            }));
            if let Err(e) = socket.send(close).await {
                debug!("Failed to send close frame: {}", e);
            }
            conn.advance(Phase::Closed);
            return;
        }
    };

    let registry = app_state.registry.clone();
    let (handle, outbound_rx, eviction) = ConnectionHandle::channel(conn.id, app_state.config.outbound_buffer);
    let ack = registry.connect(document_id, &identity.user_id, &identity.display_name, handle.clone());
    let lease = SessionLease {
        registry: registry.clone(),
        user_id: identity.user_id.clone(),
        connection_id: conn.id,
    };
    conn.advance(Phase::Joined);
    info!(
        document_id,
        user_id = %identity.user_id,
        connection_id = %conn.id,
        color = ack.color,
        replaced = ?ack.replaced,
        "User joined room"
    );

    let (sender, receiver) = socket.split();
    let mut send_task = tokio::spawn(write_outbound(sender, outbound_rx, eviction));
    let mut recv_task = tokio::spawn(read_inbound(receiver, registry, document_id, identity.user_id, handle));

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    conn.advance(Phase::Closing);
    drop(lease);
    conn.advance(Phase::Closed);
    info!("WebSocket connection terminated for document {}", document_id);
}

/// Drain the connection's outbound queue onto the socket until the queue
/// closes or the registry evicts the connection. Eviction wins over any
/// messages still queued.
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
    eviction: EvictionWatch,
) {
    let evicted = evicted(eviction);
    tokio::pin!(evicted);

    loop {
        let msg = tokio::select! {
            biased;
            eviction = &mut evicted => {
                debug!(code = eviction.code, reason = eviction.reason, "Connection evicted");
                let close = Message::Close(Some(CloseFrame { code: eviction.code, reason: eviction.reason.into() }));
                let _ = sender.send(close).await;
                break;
            }
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };

        let text = match serde_json::to_string(&msg) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize outbound message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

async fn read_inbound(
    mut receiver: SplitStream<WebSocket>,
    registry: Arc<SessionRegistry>,
    document_id: DocumentId,
    user_id: String,
    handle: ConnectionHandle,
) {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                dispatch(&text, &registry, document_id, &user_id, &handle);
            }
            Ok(Message::Close(_)) => {
                debug!("Client requested close");
                break;
            }
            // Binary frames carry nothing in this protocol; ping/pong is handled by axum.
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket read error for document {}: {}", document_id, e);
                break;
            }
        }
    }
}

fn dispatch(
    text: &str,
    registry: &SessionRegistry,
    document_id: DocumentId,
    user_id: &str,
    handle: &ConnectionHandle,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Dropping malformed message for document {}: {}", document_id, e);
            return;
        }
    };

    match msg {
        ClientMessage::Cursor { position, selection_start, selection_end } => {
            handle_cursor_message(registry, user_id, handle.id(), position, selection_start, selection_end);
        }
        ClientMessage::Content { content, cursor_position } => {
            handle_content_message(registry, user_id, handle.id(), content, cursor_position);
        }
        ClientMessage::Ping => handle_ping_message(document_id, handle),
        ClientMessage::Unknown => debug!("Ignoring message of unknown type for document {}", document_id),
    }
}
