use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::models::ServerMessage;

/// Close code sent when the credential presented at connect time is rejected.
pub const CLOSE_INVALID_TOKEN: u16 = 4001;
/// Close code sent to a connection whose user connected again elsewhere.
pub const CLOSE_SESSION_REPLACED: u16 = 4002;

/// Identifies one physical connection. A user that reconnects gets a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why the registry asked a connection to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub code: u16,
    pub reason: &'static str,
}

pub type EvictionWatch = watch::Receiver<Option<Eviction>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The peer is not draining its queue fast enough.
    Full,
    /// The peer's writer is gone; its own loop will clean it up.
    Closed,
}

/// Address of a connection's outbound queue and eviction signal.
///
/// Rooms keep one of these per session for routing only. Dropping it does
/// not close the connection; the connection's own loop owns its lifetime.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerMessage>,
    evict: Arc<watch::Sender<Option<Eviction>>>,
}

impl ConnectionHandle {
    /// A handle plus the two ends the connection loop drains: the bounded
    /// message queue and the eviction watch.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>, EvictionWatch) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (evict, evicted) = watch::channel(None);
        (Self { id, tx, evict: Arc::new(evict) }, rx, evicted)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue without waiting. Never blocks the caller on a slow peer.
    pub fn deliver(&self, msg: ServerMessage) -> Result<(), DeliveryError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the connection to close. Bypasses the message queue, so it lands
    /// even when the queue is full.
    pub fn evict(&self, code: u16, reason: &'static str) {
        self.evict.send_replace(Some(Eviction { code, reason }));
    }
}

/// Resolves once the registry evicts the connection. Pends forever if the
/// handle is dropped without an eviction, i.e. after a normal release.
pub async fn evicted(mut watch: EvictionWatch) -> Eviction {
    let eviction = watch
        .wait_for(Option::is_some)
        .await
        .map(|current| *current)
        .ok()
        .flatten();
    match eviction {
        Some(eviction) => eviction,
        None => std::future::pending().await,
    }
}
