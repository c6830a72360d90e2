use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::debug;

use crate::models::{DocumentId, PresenceResponse};
use crate::AppState;

/// Current users of a draft, for presence indicators without a socket.
///
/// Reading presence never creates a room.
pub async fn room_presence(
    State(app_state): State<Arc<AppState>>,
    Path(document_id): Path<DocumentId>,
) -> Json<PresenceResponse> {
    let users = app_state.registry.room_presence(document_id);
    debug!("Presence requested for document {}: {} users", document_id, users.len());
    Json(PresenceResponse {
        document_id,
        count: users.len(),
        users,
    })
}
