use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod document_types;
pub mod documents;
pub mod health;
pub mod profile;

/// Room for the multipart envelope and the text fields around the file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        tracing::warn!(origin = %value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());
    let body_limit = usize::try_from(state.config.max_upload_size)
        .unwrap_or(usize::MAX / 2)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::create_document),
        )
        .route("/stats", get(documents::document_stats))
        .route(
            "/:id",
            get(documents::get_document).patch(documents::update_document),
        )
        .route("/:id/review", post(documents::review_document))
        .route("/:id/history", get(documents::document_history))
        .route("/:id/file", get(documents::document_file));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/documents", documents_routes)
        .route(
            "/api/document-types",
            get(document_types::list_document_types),
        )
        .route("/api/profile", put(profile::update_profile))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
