use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::models::ErrorResponse;
use crate::services::auth_service::get_auth_token;
use crate::AppState;

/// Require a valid credential and expose the caller's `Identity` to handlers.
pub async fn auth_middleware(
    State(app_state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {

    // 1. Get the auth token from the request
    let token = get_auth_token(req.headers()).map_err(|e| {
        info!("Rejecting request to {}: {}", req.uri().path(), e);
        ErrorResponse::reply(StatusCode::UNAUTHORIZED, e.to_string())
    })?;

    // 2. Validate the token
    let identity = app_state.verifier.verify(&token).map_err(|e| {
        error!("Token validation failed: {}", e);
        ErrorResponse::reply(StatusCode::UNAUTHORIZED, "Invalid or expired token")
    })?;

    // 3. Hand the identity to downstream handlers
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
