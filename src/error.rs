use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub const BATCH_FORMAT_HINT: &str = r#"Accepted formats are {"urls": ["url1", "url2"]} or {"images": [{"url":"url1"}, {"url":"url2"}]}"#;

/// Remote image retrieval failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP Error {code}: {reason}")]
    Status { code: u16, reason: String },

    #[error("Error during URL retrieval: {0}")]
    Transport(String),

    #[error("Error during URL retrieval: image exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

impl FetchError {
    pub fn error_code(&self) -> u16 {
        match self {
            FetchError::Status { code, .. } => *code,
            FetchError::Transport(_) | FetchError::TooLarge { .. } => 500,
        }
    }
}

/// Failures on the scoring path.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Error during image classification: {0}")]
    Engine(String),

    #[error("Error during image classification: engine returned {0} probabilities")]
    MissingScore(usize),

    #[error("Error during image classification: timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Filesystem failures while holding an upload.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("No selected file")]
    EmptyFilename,

    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

/// Request-level failures rendered as `{"error": ...}` bodies.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Missing url parameter")]
    MissingUrl,

    #[error("No image in request")]
    NoImage,

    #[error("No selected file")]
    NoSelectedFile,

    #[error("{}", BATCH_FORMAT_HINT)]
    BadBatchFormat,

    #[error("{0}")]
    PayloadTooLarge(String),

    /// An upload classified through the item path, carrying its status and reason.
    #[error("{reason}")]
    Upload { code: u16, reason: String },

    #[error("Error during classification: {0}")]
    Classification(#[from] ClassificationError),

    #[error("Error during classification: {0}")]
    Resource(#[source] ResourceError),
}

impl From<ResourceError> for ApiError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::EmptyFilename => ApiError::NoSelectedFile,
            other => ApiError::Resource(other),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingUrl | ApiError::BadBatchFormat => StatusCode::BAD_REQUEST,
            ApiError::NoImage | ApiError::NoSelectedFile => StatusCode::GONE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upload { code, .. } => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::Classification(_) | ApiError::Resource(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
