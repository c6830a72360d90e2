use tracing::debug;

use crate::ws::connctx::ConnectionId;
use crate::ws::registry::SessionRegistry;

/// Handle a content message - replace the room snapshot (last write wins)
/// and broadcast it to the other sessions.
pub fn handle_content_message(
    registry: &SessionRegistry,
    user_id: &str,
    connection_id: ConnectionId,
    content: String,
    cursor_position: Option<i64>,
) {
    let len = content.len();
    match registry.update_content(user_id, connection_id, content, cursor_position) {
        Some(delivery) => debug!(
            user_id,
            bytes = len,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Content update broadcast"
        ),
        None => debug!(user_id, %connection_id, "Content update from unregistered or replaced connection ignored"),
    }
}
