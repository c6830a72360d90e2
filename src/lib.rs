pub mod auth;
pub mod config;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod websocket;
pub mod ws;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use auth::{IdentityVerifier, JwtVerifier};
use config::Config;
use docs::ApiDoc;
use routes::create_api_routes;
use ws::registry::SessionRegistry;

/// Shared by every request and every connection loop.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        if config.jwt_secret.is_none() {
            if config.is_production() {
                error!("No JWT secret configured in production - every connection will be rejected");
            } else {
                warn!("No JWT secret configured - every connection will be rejected");
            }
        }
        let verifier = Arc::new(JwtVerifier::new(config.jwt_secret.as_deref()));
        Self::with_verifier(config, verifier)
    }

    pub fn with_verifier(config: Config, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(SessionRegistry::new()),
            verifier,
        }
    }
}

/// Build the full application router: API, collaboration socket and Swagger UI.
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    let app = Router::new()
        .nest("/api", create_api_routes(state))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    match cors {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    if origins.is_empty() {
        // Local frontends run on arbitrary ports during development.
        return config.is_development().then(CorsLayer::permissive);
    }
    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
