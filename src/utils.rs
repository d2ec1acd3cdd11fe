use crate::routes::constants::ERROR_SOMETHING_WENT_WRONG;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// `{"error": message}` with the given status code.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

// Return a 400 carrying the error's message, with logging
pub fn e400<T>(e: T) -> Response
where
    T: std::fmt::Debug + std::fmt::Display,
{
    tracing::warn!("Bad request: {}", e);
    json_error(StatusCode::BAD_REQUEST, e.to_string())
}

// Return an opaque 500 while preserving the error root's cause for logging.
pub fn e500<T>(e: T) -> Response
where
    T: std::fmt::Debug + std::fmt::Display,
{
    tracing::error!(error.cause_chain = ?e, "Internal server error: {}", e);
    json_error(StatusCode::INTERNAL_SERVER_ERROR, ERROR_SOMETHING_WENT_WRONG)
}
