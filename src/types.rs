use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ClassificationError, FetchError};

/// One image to classify, plus whatever fields the caller attached to it.
#[derive(Debug, Clone, Default)]
pub struct ImageDescriptor {
    pub source: ImageSource,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub enum ImageSource {
    Url(String),
    Upload {
        filename: String,
        data: Bytes,
    },
    /// The caller's object carried no usable `url`.
    #[default]
    Missing,
}

impl ImageDescriptor {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let mut fields = Map::new();
        fields.insert("url".to_string(), Value::String(url.clone()));
        Self {
            source: ImageSource::Url(url),
            fields,
        }
    }

    /// Wraps a caller-supplied object; the `url` field stays in the pass-through fields.
    pub fn from_object(fields: Map<String, Value>) -> Self {
        let source = match fields.get("url") {
            Some(Value::String(url)) => ImageSource::Url(url.clone()),
            _ => ImageSource::Missing,
        };
        Self { source, fields }
    }

    pub fn from_upload(filename: impl Into<String>, data: Bytes) -> Self {
        Self {
            source: ImageSource::Upload {
                filename: filename.into(),
                data,
            },
            fields: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Score { score: f32 },
    Error { error_code: u16, error_reason: String },
}

/// The result for one descriptor: an outcome merged with the descriptor's fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub outcome: Outcome,
    pub fields: Map<String, Value>,
}

impl ClassificationResult {
    pub fn new(outcome: Outcome, fields: Map<String, Value>) -> Self {
        Self { outcome, fields }
    }

    pub fn score(&self) -> Option<f32> {
        match self.outcome {
            Outcome::Score { score } => Some(score),
            Outcome::Error { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<u16> {
        match self.outcome {
            Outcome::Error { error_code, .. } => Some(error_code),
            Outcome::Score { .. } => None,
        }
    }

    /// Flattens into a single JSON object; descriptor fields override outcome keys.
    pub fn to_json(&self) -> Value {
        let mut object = match serde_json::to_value(&self.outcome) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object)
    }
}

impl Serialize for ClassificationResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<FetchError> for Outcome {
    fn from(err: FetchError) -> Self {
        Outcome::Error {
            error_code: err.error_code(),
            error_reason: err.to_string(),
        }
    }
}

impl From<ClassificationError> for Outcome {
    fn from(err: ClassificationError) -> Self {
        Outcome::Error {
            error_code: 500,
            error_reason: format!("Error during classification: {err}"),
        }
    }
}

/// `GET /` query string.
#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    pub score: f32,
}
