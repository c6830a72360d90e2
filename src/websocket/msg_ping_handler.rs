use tracing::debug;

use crate::models::{DocumentId, ServerMessage};
use crate::ws::connctx::ConnectionHandle;

/// Handle a ping - reply pong on this connection only.
///
/// Goes through the same non-blocking queue as broadcasts, so a reader
/// whose writer has stalled never waits here.
pub fn handle_ping_message(document_id: DocumentId, handle: &ConnectionHandle) {
    debug!("Ping message received for document {}", document_id);

    if let Err(e) = handle.deliver(ServerMessage::Pong) {
        debug!("Pong for document {} not queued: {:?}", document_id, e);
    }
}
