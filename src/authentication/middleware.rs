use crate::routes::constants::{ERROR_AUTHENTICATION_FAILED, ERROR_AUTHENTICATION_REQUIRED};
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;

/// Bearer token guarding the issue administration routes.
#[derive(Clone)]
pub struct AdminToken(Arc<Secret<String>>);

impl AdminToken {
    pub fn new(token: Secret<String>) -> Self {
        Self(Arc::new(token))
    }

    fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.expose_secret();
        !expected.is_empty() && constant_time_eq(expected.as_bytes(), candidate.as_bytes())
    }
}

/// Compares every byte regardless of where the first mismatch is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

pub async fn require_admin(
    State(admin_token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = bearer_token(&request).map(|token| admin_token.matches(token));
    match authorized {
        None => unauthorized(ERROR_AUTHENTICATION_REQUIRED),
        Some(true) => next.run(request).await,
        Some(false) => {
            tracing::warn!("Rejected an admin request with a wrong token");
            unauthorized(ERROR_AUTHENTICATION_FAILED)
        }
    }
}
