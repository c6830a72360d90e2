use crate::{
    handlers::{diagnostics, health_check, ready_check, room_presence},
    routes::auth_middleware::auth_middleware,
    websocket::handler::websocket_handler,
    AppState,
};
use axum::{middleware, routing::get, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    let protected = Router::<Arc<AppState>>::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)); // Applies to all routes added above

    Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/collab/ws/draft/:document_id", get(websocket_handler))
        .route("/collab/draft/:document_id/presence", get(room_presence))
        .merge(protected)
        .with_state(state)
}
