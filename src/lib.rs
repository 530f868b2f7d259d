//! HTTP service scoring images with a two-class classifier.
//!
//! Images arrive as multipart uploads, single URLs, or batches of URLs.
//! Batch results are streamed back in input order as they complete.

pub mod batch;
pub mod batched_engine;
pub mod classifier;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetcher;
pub mod resnet_engine;
pub mod resource;
pub mod routes;
pub mod scorer;
pub mod types;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use classifier::Classifier;

#[derive(Clone)]
pub struct AppState {
    pub classifier: Classifier,
    pub batch_concurrency: usize,
}

impl AppState {
    pub fn new(classifier: Classifier, batch_concurrency: usize) -> Self {
        Self {
            classifier,
            batch_concurrency: batch_concurrency.max(1),
        }
    }
}

/// Classification routes; metrics are layered on by the binary.
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route(
            "/",
            get(routes::classify_url).post(routes::classify_upload),
        )
        .route("/batch-classify", post(routes::batch_classify))
        .route("/health", get(routes::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}
