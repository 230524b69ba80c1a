pub mod download;
pub mod health;
pub mod tools;

pub use download::*;
pub use health::*;
pub use tools::*;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::logging_middleware;
use crate::services::JobService;

/// All routes, with the shared middleware stack and `service` as state.
pub fn create_router(service: JobService) -> Router {
    let body_limit = service.config().max_content_length_bytes();

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/api/pdf/merge", post(merge_handler))
        .route("/api/pdf/split", post(split_handler))
        .route("/api/pdf/compress", post(compress_handler))
        .route("/api/pdf/image-to-pdf", post(image_to_pdf_handler))
        .route("/api/pdf/pdf-to-word", post(pdf_to_word_handler))
        .route("/api/pdf/word-to-pdf", post(word_to_pdf_handler))
        .route("/api/pdf/download/:job_id/:filename", get(download_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(axum::middleware::from_fn(logging_middleware)),
        )
        .with_state(service)
}
