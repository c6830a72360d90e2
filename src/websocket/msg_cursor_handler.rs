use tracing::debug;

use crate::ws::connctx::ConnectionId;
use crate::ws::registry::SessionRegistry;

/// Handle a cursor message - record it and broadcast to the other sessions.
pub fn handle_cursor_message(
    registry: &SessionRegistry,
    user_id: &str,
    connection_id: ConnectionId,
    position: i64,
    selection_start: Option<i64>,
    selection_end: Option<i64>,
) {
    match registry.update_cursor(user_id, connection_id, position, selection_start, selection_end) {
        Some(delivery) => debug!(
            user_id,
            position,
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Cursor update broadcast"
        ),
        None => debug!(user_id, %connection_id, "Cursor update from unregistered or replaced connection ignored"),
    }
}
