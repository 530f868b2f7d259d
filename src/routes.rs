use axum::{
    Json,
    body::{Body, Bytes},
    extract::{
        Multipart, Query, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics::counter;
use serde_json::{Value, json};

use crate::AppState;
use crate::batch;
use crate::error::ApiError;
use crate::types::{ImageDescriptor, Outcome, ScoreResponse, UrlQuery};

/// `GET /?url=...`: item errors are reported inside a 200 body.
#[tracing::instrument(skip(state))]
pub async fn classify_url(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<Value>, ApiError> {
    counter!("classification_requests_total", "route" => "url").increment(1);
    let url = query.url.ok_or(ApiError::MissingUrl)?;

    let result = state.classifier.classify(ImageDescriptor::from_url(url)).await;
    Ok(Json(result.to_json()))
}

/// `POST /` with a multipart `image` field.
#[tracing::instrument(skip(state, multipart))]
pub async fn classify_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ScoreResponse>, ApiError> {
    counter!("classification_requests_total", "route" => "upload").increment(1);
    let mut multipart = multipart.map_err(|_| ApiError::NoImage)?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        // A part without a filename is a form value, not a file.
        if field.name() != Some("image") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        if filename.is_empty() {
            return Err(ApiError::NoSelectedFile);
        }
        let data = field.bytes().await.map_err(multipart_error)?;
        tracing::info!(filename = %filename, bytes = data.len(), "Received upload");

        let result = state
            .classifier
            .classify(ImageDescriptor::from_upload(filename, data))
            .await;
        return match result.outcome {
            Outcome::Score { score } => Ok(Json(ScoreResponse { score })),
            Outcome::Error {
                error_code,
                error_reason,
            } => Err(ApiError::Upload {
                code: error_code,
                reason: error_reason,
            }),
        };
    }

    Err(ApiError::NoImage)
}

/// Oversized bodies keep their 413; anything else means no usable image.
fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        tracing::debug!(error = %err, "Unreadable multipart body");
        ApiError::NoImage
    }
}

/// `POST /batch-classify`: streams `{"predictions": [...]}` in input order.
#[tracing::instrument(skip(state, body), fields(body_bytes = body.len()))]
pub async fn batch_classify(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ApiError> {
    counter!("classification_requests_total", "route" => "batch").increment(1);
    let request: Value = serde_json::from_slice(&body).map_err(|_| ApiError::BadBatchFormat)?;
    let descriptors = batch::normalize(&request)?;
    let len = descriptors.len();
    tracing::info!(items = len, "Processing batch");

    let results = batch::classify_all(state.classifier.clone(), descriptors, state.batch_concurrency);
    let body = Body::from_stream(batch::predictions_body(results, len));

    Ok(([(header::CONTENT_TYPE, "application/json")], body).into_response())
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
