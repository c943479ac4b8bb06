//! HTTP API surface for gpud
//!
//! REST + SSE over axum: the predefined task endpoint streams framed events,
//! the session endpoints manage long-lived sessions, and `/health` reports
//! GPU, session, and task state without authentication.

mod auth;
mod error;
mod rest;

pub use error::ApiError;
pub use rest::{create_router, AppState};
