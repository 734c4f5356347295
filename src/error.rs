//! Error types for the caching layer
//!
//! Provides unified error handling using thiserror. Engine components return
//! these errors; the `CacheStore` facade converts them into misses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the caching layer.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Network or protocol failure talking to the backend
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Value could not be serialized, compressed or decoded
    #[error("Encoding failure: {0}")]
    Encoding(String),

    /// Expiry lies in the past or validity is negative
    #[error("Expiry rejected: {0}")]
    ExpiryRejected(String),

    /// Waiting on a stampede lock exceeded its safety bound
    #[error("Lock wait timed out after {0:?}")]
    LockTimeout(std::time::Duration),

    /// A compare-and-swap write lost the race
    #[error("CAS conflict on {0}")]
    CasConflict(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Caching is switched off by configuration
    #[error("Caching is disabled")]
    Disabled,
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Encoding(err.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Encoding(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidRequest(_) | CacheError::ExpiryRejected(_) => {
                StatusCode::BAD_REQUEST
            }
            CacheError::CasConflict(_) => StatusCode::CONFLICT,
            CacheError::BackendUnavailable(_) | CacheError::Disabled => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            CacheError::LockTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the caching layer.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_maps_to_encoding() {
        let err: CacheError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, CacheError::Encoding(_)));
    }

    #[test]
    fn test_status_codes() {
        let response = CacheError::Disabled.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = CacheError::CasConflict("R".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = CacheError::InvalidRequest("blank".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
