use metrics::counter;

use crate::error::ApiError;
use crate::fetcher::RemoteFetcher;
use crate::resource::ResourceHandler;
use crate::scorer::Scorer;
use crate::types::{ClassificationResult, ImageDescriptor, ImageSource, Outcome};

/// Classifies one descriptor at a time, never letting an item failure escape.
#[derive(Clone)]
pub struct Classifier {
    scorer: Scorer,
    fetcher: RemoteFetcher,
    resources: ResourceHandler,
}

impl Classifier {
    pub fn new(scorer: Scorer, fetcher: RemoteFetcher, resources: ResourceHandler) -> Self {
        Self {
            scorer,
            fetcher,
            resources,
        }
    }

    #[tracing::instrument(skip(self, descriptor))]
    pub async fn classify(&self, descriptor: ImageDescriptor) -> ClassificationResult {
        let ImageDescriptor { source, fields } = descriptor;
        let outcome = match source {
            ImageSource::Url(url) => self.classify_url(&url).await,
            ImageSource::Upload { filename, data } => {
                match self.classify_upload(&filename, data).await {
                    Ok(score) => Outcome::Score { score },
                    Err(ApiError::Classification(e)) => e.into(),
                    Err(e) => Outcome::Error {
                        error_code: e.status().as_u16(),
                        error_reason: e.to_string(),
                    },
                }
            }
            ImageSource::Missing => Outcome::Error {
                error_code: 400,
                error_reason: "Missing url field".to_string(),
            },
        };

        if let Outcome::Error { error_code, .. } = &outcome {
            counter!("classification_failures_total", "code" => error_code.to_string())
                .increment(1);
        }
        ClassificationResult::new(outcome, fields)
    }

    async fn classify_url(&self, url: &str) -> Outcome {
        let image = match self.fetcher.fetch(url).await {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(url, error = %e, "Image retrieval failed");
                return e.into();
            }
        };

        match self.scorer.score(image).await {
            Ok(score) => Outcome::Score { score },
            Err(e) => {
                tracing::error!(url, error = %e, "Error during classification");
                e.into()
            }
        }
    }

    /// Scores a direct upload, releasing its storage on every path.
    #[tracing::instrument(skip(self, data), fields(bytes = data.len()))]
    async fn classify_upload(
        &self,
        filename: &str,
        data: axum::body::Bytes,
    ) -> Result<f32, ApiError> {
        let mut handle = self.resources.acquire(filename, data).await?;

        let scored = async {
            let image = handle.read_all().await?;
            Ok::<_, ApiError>(self.scorer.score(image).await?)
        }
        .await;

        let released = handle.release().await;
        let score = scored?;
        released?;
        Ok(score)
    }
}
