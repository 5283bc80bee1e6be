use axum::{http::StatusCode, response::Response};
use serde_json::Value;

/// Reads a response body as JSON
#[allow(dead_code)]
pub async fn read_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Asserts that an HTTP response is an error body with the expected status and kind
#[allow(dead_code)]
pub async fn assert_error_kind(response: Response, status: StatusCode, kind: &str) {
    assert_eq!(response.status(), status);
    let body = read_json(response).await;
    assert_eq!(body["kind"], kind, "unexpected error body: {}", body);
    assert!(body["error"].is_string());
}
