//! Integration test: HTTP routes with a stub inference engine

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode, header};
use axum::{Router, routing::get};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

use vetter::classifier::Classifier;
use vetter::config::{FetchConfig, StorageMode};
use vetter::engine::Engine;
use vetter::fetcher::RemoteFetcher;
use vetter::resource::ResourceHandler;
use vetter::scorer::Scorer;
use vetter::{AppState, create_router};

/// Rejects anything that is not the bytes `GOOD`.
struct PickyEngine;

#[async_trait]
impl Engine for PickyEngine {
    async fn probabilities(&self, image: Bytes) -> Result<Vec<f32>> {
        if &image[..] == b"GOOD" {
            Ok(vec![0.2, 0.8])
        } else {
            anyhow::bail!("cannot identify image file")
        }
    }
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("vetter-routes-{}", uuid::Uuid::new_v4()))
}

fn test_app(mode: StorageMode, image_dir: &PathBuf) -> Router {
    let classifier = Classifier::new(
        Scorer::new(Arc::new(PickyEngine), None),
        RemoteFetcher::new(&FetchConfig::default()).unwrap(),
        ResourceHandler::new(mode, image_dir),
    );
    create_router(AppState::new(classifier, 1), 1024 * 1024)
}

/// Serves `/good.jpg`, `/bad.jpg` and a 404 for everything else.
async fn image_host() -> String {
    let router = Router::new()
        .route("/good.jpg", get(|| async { "GOOD" }))
        .route("/bad.jpg", get(|| async { "BAD" }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });
    format!("http://{addr}")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn multipart_request(field: &str, filename: Option<&str>, data: &[u8]) -> Request<Body> {
    let boundary = "XBOUNDARYX";
    let disposition = match filename {
        Some(filename) => format!("form-data; name=\"{field}\"; filename=\"{filename}\""),
        None => format!("form-data; name=\"{field}\""),
    };
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn batch_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/batch-classify")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_get_without_url_is_400() {
    let app = test_app(StorageMode::Memory, &scratch_dir());
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({"error": "Missing url parameter"})
    );
}

#[tokio::test]
async fn test_get_with_url_returns_score_and_url() {
    let host = image_host().await;
    let url = format!("{host}/good.jpg");
    let app = test_app(StorageMode::Memory, &scratch_dir());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/?url={url}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["url"], json!(url));
    let score = body["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
}

#[tokio::test]
async fn test_get_with_missing_image_reports_status_in_body() {
    let host = image_host().await;
    let url = format!("{host}/nope.jpg");
    let app = test_app(StorageMode::Memory, &scratch_dir());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/?url={url}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"error_code": 404, "error_reason": "HTTP Error 404: Not Found", "url": url})
    );
}

#[tokio::test]
async fn test_upload_scores_and_cleans_up() {
    let dir = scratch_dir();
    let app = test_app(StorageMode::Disk, &dir);

    let response = app
        .oneshot(multipart_request("image", Some("photo.jpg"), b"GOOD"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let score = body_json(response).await["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));

    let leftovers = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_upload_failure_is_500_and_cleans_up() {
    let dir = scratch_dir();
    let app = test_app(StorageMode::Disk, &dir);

    let response = app
        .oneshot(multipart_request("image", Some("photo.jpg"), b"garbage"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error = body_json(response).await["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Error during classification: "));

    let leftovers = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_upload_without_image_field_is_410() {
    let app = test_app(StorageMode::Memory, &scratch_dir());
    let response = app
        .oneshot(multipart_request("other", Some("photo.jpg"), b"GOOD"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(
        body_json(response).await,
        json!({"error": "No image in request"})
    );
}

#[tokio::test]
async fn test_upload_with_empty_filename_is_410() {
    let app = test_app(StorageMode::Memory, &scratch_dir());
    let response = app
        .oneshot(multipart_request("image", Some(""), b"GOOD"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(body_json(response).await, json!({"error": "No selected file"}));
}

#[tokio::test]
async fn test_empty_batch() {
    let app = test_app(StorageMode::Memory, &scratch_dir());
    let response = app.oneshot(batch_request(json!({"urls": []}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/json"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], br#"{"predictions": []}"#);
}

#[tokio::test]
async fn test_batch_keeps_order_and_isolates_failures() {
    let host = image_host().await;
    let urls = vec![
        format!("{host}/good.jpg"),
        format!("{host}/missing.jpg"),
        format!("{host}/bad.jpg"),
        "not a url".to_string(),
        format!("{host}/good.jpg"),
    ];
    let app = test_app(StorageMode::Memory, &scratch_dir());

    let response = app
        .oneshot(batch_request(json!({ "urls": urls })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), urls.len());

    for (prediction, url) in predictions.iter().zip(&urls) {
        assert_eq!(prediction["url"], json!(url));
    }
    assert!(predictions[0]["score"].is_number());
    assert_eq!(predictions[1]["error_code"], 404);
    assert_eq!(predictions[2]["error_code"], 500);
    assert!(
        predictions[2]["error_reason"]
            .as_str()
            .unwrap()
            .starts_with("Error during classification: ")
    );
    assert_eq!(predictions[3]["error_code"], 500);
    assert!(
        predictions[3]["error_reason"]
            .as_str()
            .unwrap()
            .starts_with("Error during URL retrieval: ")
    );
    assert!(predictions[4]["score"].is_number());
}

#[tokio::test]
async fn test_batch_images_pass_fields_through() {
    let host = image_host().await;
    let app = test_app(StorageMode::Memory, &scratch_dir());

    let response = app
        .oneshot(batch_request(json!({"images": [
            {"url": format!("{host}/good.jpg"), "id": "first"},
            {"id": "second"},
        ]})))
        .await
        .unwrap();
    let body = body_json(response).await;
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions[0]["id"], "first");
    assert!(predictions[0]["score"].is_number());
    assert_eq!(
        predictions[1],
        json!({"error_code": 400, "error_reason": "Missing url field", "id": "second"})
    );
}

#[tokio::test]
async fn test_malformed_batch_is_400() {
    let app = test_app(StorageMode::Memory, &scratch_dir());
    let response = app
        .oneshot(batch_request(json!({"links": ["a"]})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error = body_json(response).await["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Accepted formats are"));
}

#[tokio::test]
async fn test_parallel_batch_preserves_order() {
    let host = image_host().await;
    let classifier = Classifier::new(
        Scorer::new(Arc::new(PickyEngine), None),
        RemoteFetcher::new(&FetchConfig::default()).unwrap(),
        ResourceHandler::new(StorageMode::Memory, scratch_dir()),
    );
    let app = create_router(AppState::new(classifier, 4), 1024 * 1024);

    let urls: Vec<String> = (0..10)
        .map(|i| {
            if i % 2 == 0 {
                format!("{host}/good.jpg?i={i}")
            } else {
                format!("{host}/missing.jpg?i={i}")
            }
        })
        .collect();
    let response = app
        .oneshot(batch_request(json!({ "urls": urls })))
        .await
        .unwrap();
    let body = body_json(response).await;
    let predictions = body["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 10);
    for (i, (prediction, url)) in predictions.iter().zip(&urls).enumerate() {
        assert_eq!(prediction["url"], json!(url));
        assert_eq!(prediction["score"].is_number(), i % 2 == 0);
    }
}

#[tokio::test]
async fn test_image_part_without_filename_is_not_a_file() {
    let app = test_app(StorageMode::Memory, &scratch_dir());
    let response = app
        .oneshot(multipart_request("image", None, b"GOOD"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(
        body_json(response).await,
        json!({"error": "No image in request"})
    );
}

#[tokio::test]
async fn test_oversized_upload_is_413() {
    let classifier = Classifier::new(
        Scorer::new(Arc::new(PickyEngine), None),
        RemoteFetcher::new(&FetchConfig::default()).unwrap(),
        ResourceHandler::new(StorageMode::Memory, scratch_dir()),
    );
    let app = create_router(AppState::new(classifier, 1), 64);

    let response = app
        .oneshot(multipart_request("image", Some("photo.jpg"), &[b'x'; 4096]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body_json(response).await["error"].is_string());
}
