//! Error-to-HTTP mapping

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use gpud_core::GpudError;

/// Seconds a client should wait before retrying a capacity refusal.
const RETRY_AFTER_SECONDS: &str = "5";

/// Wrapper turning `GpudError` into an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub GpudError);

impl From<GpudError> for ApiError {
    fn from(err: GpudError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            GpudError::UnknownTask(_)
            | GpudError::MissingAction(_)
            | GpudError::InvalidDifficulty(_)
            | GpudError::Serialization(_)
            | GpudError::ImageNotAllowed(_) => StatusCode::BAD_REQUEST,
            GpudError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GpudError::SessionNotFound(_) | GpudError::InvalidSessionState { .. } => {
                StatusCode::NOT_FOUND
            }
            GpudError::CapacityFull { .. } | GpudError::QueueFull(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GpudError::Fetch { .. }
            | GpudError::Container(_)
            | GpudError::RuntimeUnavailable(_)
            | GpudError::Config(_)
            | GpudError::Io(_)
            | GpudError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> serde_json::Value {
        match &self.0 {
            GpudError::CapacityFull { difficulty } => json!({
                "status": "full",
                "difficulty": difficulty,
            }),
            GpudError::QueueFull(session_id) => json!({
                "status": "queue_full",
                "session_id": session_id,
            }),
            other => json!({ "detail": other.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(self.body())).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                header::HeaderValue::from_static(RETRY_AFTER_SECONDS),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpud_core::Difficulty;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(GpudError::UnknownTask("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(GpudError::Serialization("bad difficulty tag".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(GpudError::Unauthenticated).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(GpudError::SessionNotFound(Uuid::new_v4())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(GpudError::CapacityFull {
                difficulty: Difficulty::Low
            })
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(GpudError::QueueFull(Uuid::new_v4())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(GpudError::Container("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_capacity_body_carries_difficulty() {
        let err = ApiError(GpudError::CapacityFull {
            difficulty: Difficulty::Low,
        });
        let body = err.body();
        assert_eq!(body["status"], "full");
        assert_eq!(body["difficulty"], "low");
    }

    #[test]
    fn test_retry_after_header_on_503() {
        let response = ApiError(GpudError::CapacityFull {
            difficulty: Difficulty::High,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            RETRY_AFTER_SECONDS
        );
    }
}
