//! # Stagegate HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /stages` - Ordered stage catalog
//! - `POST /projects` - Register a project
//! - `GET /projects/{id}` - Fetch a project
//! - `POST /projects/{id}/documents` - Attach a document
//! - `POST /projects/{id}/approvals` - Request an approval
//! - `POST /approvals/decide` - Decide an approval
//! - `POST /projects/{id}/reviews` - Record a department review
//! - `POST /transitions/validate` - Evaluate a transition (no side effects)
//! - `POST /transitions/confirm` - Commit a transition
//! - `GET /projects/{id}/can-advance/{stage}` - Document-only readiness
//! - `GET /projects/{id}/history` - Stage history with timing
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `STAGEGATE_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `STAGEGATE_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `STAGEGATE_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{USER_HEADER, acting_user, get_api_key_from_env};
pub use handlers::ApiError;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    AddReviewRequest, AttachDocumentRequest, ConfirmTransitionRequest, CreateProjectRequest,
    DecideApprovalRequest, ErrorResponse, HealthResponse, HistoryResponse,
    RequestApprovalRequest, StagesResponse, ValidateTransitionRequest,
};

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use stagegate_core::{Engine, PermissionTable, StageGateError, StaticPermissions, UserId};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state: the engine and the capability grants per user.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RwLock<Engine>>,
    pub permissions: Arc<PermissionTable>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Engine, permissions: PermissionTable) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
            permissions: Arc::new(permissions),
        }
    }

    /// Grants of the acting user; an anonymous caller holds none.
    #[must_use]
    pub fn permissions_for(&self, user: Option<UserId>) -> StaticPermissions {
        user.map(|u| self.permissions.for_user(u))
            .unwrap_or_default()
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

fn allowed_headers() -> [HeaderName; 3] {
    [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        HeaderName::from_static(USER_HEADER),
    ]
}

/// Build CORS layer from `STAGEGATE_CORS_ORIGINS`.
///
/// - "*": allows all origins
/// - unset: localhost only
/// - otherwise: comma-separated list of allowed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("STAGEGATE_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (STAGEGATE_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in STAGEGATE_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers(allowed_headers())
            }
        }
        None => {
            tracing::info!("CORS: No STAGEGATE_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .map(HeaderValue::from_static)
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(allowed_headers())
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Rate Limiting - (if enabled)
/// 4. Authentication - validates API key (if configured)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set STAGEGATE_API_KEY environment variable to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/stages", get(handlers::stages_handler))
        .route("/projects", post(handlers::create_project_handler))
        .route("/projects/{id}", get(handlers::get_project_handler))
        .route(
            "/projects/{id}/documents",
            post(handlers::attach_document_handler),
        )
        .route(
            "/projects/{id}/approvals",
            post(handlers::request_approval_handler),
        )
        .route("/approvals/decide", post(handlers::decide_approval_handler))
        .route("/projects/{id}/reviews", post(handlers::add_review_handler))
        .route(
            "/transitions/validate",
            post(handlers::validate_transition_handler),
        )
        .route(
            "/transitions/confirm",
            post(handlers::confirm_transition_handler),
        )
        .route(
            "/projects/{id}/can-advance/{stage}",
            get(handlers::can_advance_handler),
        )
        .route("/projects/{id}/history", get(handlers::history_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(256 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server.
pub async fn run_server(addr: &str, state: AppState) -> Result<(), StageGateError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| StageGateError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Stagegate HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| StageGateError::Io(format!("Server error: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let app = AppConfig::builtin().unwrap();
        create_router(AppState::new(
            Engine::in_memory(app.workflow),
            app.permissions,
        ))
    }

    #[tokio::test]
    async fn health_answers_through_the_full_layer_stack() {
        let response = router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: HealthResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let payload = serde_json::json!({
            "id": 1,
            "name": "x",
            "description": "d".repeat(300 * 1024),
        });
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/projects")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
