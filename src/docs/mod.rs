use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Users currently connected to a draft
#[utoipa::path(
    get,
    path = "/api/collab/draft/{document_id}/presence",
    params(
        ("document_id" = i64, Path, description = "Draft identifier")
    ),
    responses(
        (status = 200, description = "Current presence, empty when nobody is connected", body = PresenceResponse)
    )
)]
#[allow(dead_code)]
pub async fn room_presence_doc() {}

/// Registry and process statistics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid credential", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        room_presence_doc,
        diagnostics_doc,
    ),
    components(
        schemas(HealthResponse, PresenceResponse, PresenceUser, DiagnosticsResponse, RoomSummary, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
