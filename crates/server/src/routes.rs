//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Multipart framing and text fields around the file part.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Body limit for `/upload-chunk`. Leaves room for a chunk twice the maximum
/// so oversized chunks are rejected with their actual size.
pub fn chunk_body_limit(max_chunk_size: u64) -> usize {
    (max_chunk_size as usize)
        .saturating_mul(2)
        .saturating_add(MULTIPART_OVERHEAD)
}

/// Body limit for multipart `/upload`.
pub fn direct_upload_body_limit(max_direct_upload_bytes: u64) -> usize {
    (max_direct_upload_bytes as usize).saturating_add(MULTIPART_OVERHEAD)
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;

    let chunk_routes = Router::new()
        .route("/upload-chunk", post(handlers::upload_chunk))
        .layer(DefaultBodyLimit::max(chunk_body_limit(server.max_chunk_size)))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            server.chunk_timeout(),
        ));

    let finalize_routes = Router::new()
        .route("/finalize-upload", post(handlers::finalize_upload))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            server.finalize_timeout(),
        ));

    let api_routes = Router::new()
        .route(
            "/upload",
            post(handlers::upload)
                .get(handlers::list_uploads)
                .delete(handlers::delete_upload)
                .patch(handlers::patch_upload),
        )
        .layer(DefaultBodyLimit::max(direct_upload_body_limit(
            server.max_direct_upload_bytes,
        )))
        .route("/folders", post(handlers::create_folder))
        .route("/files/{cid}", get(handlers::download))
        .route("/storage/check", post(handlers::check_storage))
        .route("/storage/info", get(handlers::storage_info))
        .route("/storage/purchase", post(handlers::purchase_storage))
        .route("/health", get(handlers::health_check))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            server.request_timeout(),
        ));

    let mut router = Router::new()
        .merge(chunk_routes)
        .merge(finalize_routes)
        .merge(api_routes);

    // When enabled, this endpoint must be network-restricted to the scraper.
    if server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
