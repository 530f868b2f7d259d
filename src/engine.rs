use anyhow::Result;
use async_trait::async_trait;
use axum::body::Bytes;

/// Turns encoded image bytes into a class probability vector.
#[async_trait]
pub trait Engine {
    async fn probabilities(&self, image: Bytes) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait BatchedEngine: Send + Sync {
    async fn probabilities_batch(&self, images: Vec<Bytes>) -> Result<Vec<Result<Vec<f32>>>>;
}
