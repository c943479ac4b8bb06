//! API-key authentication middleware

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use gpud_core::GpudError;

use crate::error::ApiError;
use crate::rest::AppState;

const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `X-API-Key` header does not match the configured
/// internal key. Applied to every `/api` route; `/health` stays open.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match presented {
        Some(key) if !state.api_key.is_empty() && key == state.api_key => {
            Ok(next.run(request).await)
        }
        _ => Err(ApiError(GpudError::Unauthenticated)),
    }
}
