//! Error types for the cache server
//!
//! The cache itself never fails; these errors only describe HTTP request outcomes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache server.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CacheError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            CacheError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache server.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn error_body(error: CacheError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_not_found_response() {
        let (status, json) = error_body(CacheError::NotFound("missing".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "missing");
    }

    #[tokio::test]
    async fn test_invalid_request_response() {
        let (status, json) = error_body(CacheError::InvalidRequest("bad key".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "bad key");
    }

    #[test]
    fn test_error_display() {
        let error = CacheError::NotFound("k".to_string());
        assert_eq!(error.to_string(), "Key not found: k");
    }
}
