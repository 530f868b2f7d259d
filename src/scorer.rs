use axum::body::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::ClassificationError;

/// Index of the positive class in the engine's probability vector.
const POSITIVE_CLASS: usize = 1;

/// Reduces the engine's class probabilities to a single score.
#[derive(Clone)]
pub struct Scorer {
    engine: Arc<dyn Engine + Send + Sync>,
    timeout: Option<Duration>,
}

impl Scorer {
    pub fn new(engine: Arc<dyn Engine + Send + Sync>, timeout: Option<Duration>) -> Self {
        Self { engine, timeout }
    }

    #[tracing::instrument(skip(self, image), fields(image_bytes = image.len()))]
    pub async fn score(&self, image: Bytes) -> Result<f32, ClassificationError> {
        let call = self.engine.probabilities(image);
        let probabilities = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| ClassificationError::Timeout(limit))?,
            None => call.await,
        }
        .map_err(|e| ClassificationError::Engine(format!("{e:#}")))?;

        probabilities
            .get(POSITIVE_CLASS)
            .copied()
            .ok_or(ClassificationError::MissingScore(probabilities.len()))
    }
}
