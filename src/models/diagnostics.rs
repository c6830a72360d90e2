use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Per-room line of the diagnostics report
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct RoomSummary {
    pub document_id: i64,
    pub n_sessions: u32,
    pub content_len: u64,
    /// Last content write, or room creation if nobody wrote yet
    pub last_updated: DateTime<Utc>,
    pub oldest_session_at: Option<DateTime<Utc>>,
}

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_rooms: u32,
    pub n_sessions: u32,
    pub rooms: Vec<RoomSummary>,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
}
