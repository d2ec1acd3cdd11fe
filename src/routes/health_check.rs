use axum::http::StatusCode;

/// Health check endpoint
///
/// Returns 200 OK if the service is running
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}
