use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::DocumentId;

/// A connected user as shown by presence indicators
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct PresenceUser {
    pub user_id: String,
    pub display_name: String,
    pub color: String,
}

/// API response for the presence of a draft
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct PresenceResponse {
    #[schema(value_type = i64)]
    pub document_id: DocumentId,
    pub users: Vec<PresenceUser>,
    pub count: usize,
}
