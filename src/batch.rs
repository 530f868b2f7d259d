//! Batch classification with incrementally streamed output.
//!
//! Results are produced lazily in input order and written out as one JSON
//! document, `{"predictions": [...]}`, one element at a time. Dropping the
//! stream (for instance when the client disconnects) stops any further
//! fetching and scoring.

use axum::body::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::convert::Infallible;

use crate::classifier::Classifier;
use crate::error::ApiError;
use crate::types::{ClassificationResult, ImageDescriptor};

const EMPTY_DOCUMENT: &str = r#"{"predictions": []}"#;
const OPEN: &str = "{\"predictions\": [\n";
const SEPARATOR: &str = ",\n";
const CLOSE: &str = "\n]}";

/// Turns a `{"urls": [...]}` or `{"images": [...]}` body into descriptors.
pub fn normalize(body: &Value) -> Result<Vec<ImageDescriptor>, ApiError> {
    if let Some(urls) = body.get("urls") {
        let urls = urls.as_array().ok_or(ApiError::BadBatchFormat)?;
        return urls
            .iter()
            .map(|url| {
                url.as_str()
                    .map(ImageDescriptor::from_url)
                    .ok_or(ApiError::BadBatchFormat)
            })
            .collect();
    }

    if let Some(images) = body.get("images") {
        let images = images.as_array().ok_or(ApiError::BadBatchFormat)?;
        return images
            .iter()
            .map(|image| {
                image
                    .as_object()
                    .cloned()
                    .map(ImageDescriptor::from_object)
                    .ok_or(ApiError::BadBatchFormat)
            })
            .collect();
    }

    Err(ApiError::BadBatchFormat)
}

/// Classifies descriptors in input order, at most `concurrency` in flight.
pub fn classify_all(
    classifier: Classifier,
    descriptors: Vec<ImageDescriptor>,
    concurrency: usize,
) -> impl Stream<Item = ClassificationResult> + Send {
    stream::iter(descriptors)
        .map(move |descriptor| {
            let classifier = classifier.clone();
            async move { classifier.classify(descriptor).await }
        })
        .buffered(concurrency.max(1))
}

/// Serializes results into the `{"predictions": [...]}` document, chunk by chunk.
///
/// `len` must be the number of results the stream will yield; an empty batch
/// becomes a single `{"predictions": []}` chunk.
pub fn predictions_body<S>(results: S, len: usize) -> impl Stream<Item = Result<Bytes, Infallible>>
where
    S: Stream<Item = ClassificationResult>,
{
    let (head, tail) = if len == 0 {
        (EMPTY_DOCUMENT, None)
    } else {
        (OPEN, Some(CLOSE))
    };

    let items = results.enumerate().map(|(index, result)| {
        let json = serde_json::to_string(&result).unwrap_or_else(|e| {
            tracing::error!(index, error = %e, "Failed to serialize prediction");
            "{}".to_string()
        });
        if index == 0 {
            json
        } else {
            format!("{SEPARATOR}{json}")
        }
    });

    stream::once(async move { head.to_string() })
        .chain(items)
        .chain(stream::iter(tail.map(str::to_string)))
        .map(|chunk| Ok(Bytes::from(chunk)))
}
