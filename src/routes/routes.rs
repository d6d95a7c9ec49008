//! Defines routes for the upload coordinator and the object store behind it.
//!
//! ## Structure
//! - **Coordinator endpoints** (bearer token required)
//!   - `POST /api/upload/initiate-upload`
//!   - `POST /api/upload/generate-presigned-url`
//!   - `POST /api/upload/complete-upload`
//!   - `POST /api/upload/abort-upload`
//!
//! - **Storage endpoints** (authorized by URL signature)
//!   - `PUT  /storage/uploads/{upload_id}/parts/{part_number}`: upload one part
//!   - `GET  /storage/objects/{*key}`: download a completed object
//!   - `HEAD /storage/objects/{*key}`: object metadata only
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    auth::require_bearer,
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_object, head_object, upload_part},
        upload_handlers::{
            abort_upload, complete_upload, generate_presigned_urls, initiate_upload,
        },
    },
    state::AppState,
};
use axum::{
    Router, middleware,
    routing::{get, post, put},
};

/// Build the full application router around `state`.
pub fn routes(state: AppState) -> Router {
    let coordinator = Router::new()
        .route("/upload/initiate-upload", post(initiate_upload))
        .route("/upload/generate-presigned-url", post(generate_presigned_urls))
        .route("/upload/complete-upload", post(complete_upload))
        .route("/upload/abort-upload", post(abort_upload))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api", coordinator)
        .route(
            "/storage/uploads/{upload_id}/parts/{part_number}",
            put(upload_part),
        )
        .route("/storage/objects/{*key}", get(get_object).head(head_object))
        .with_state(state)
}
