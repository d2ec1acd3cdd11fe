use crate::startup::AppState;
use crate::store::Store;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::Json;

#[derive(serde::Serialize)]
pub struct VerifyResponse {
    ok: bool,
}

/// Verify a subscription
///
/// Always answers 200; `ok` tells whether the token verified its owner.
#[tracing::instrument(name = "Verify a pending subscriber", skip(state, payload))]
pub async fn verify<S: Store>(
    State(state): State<AppState<S>>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Json<VerifyResponse> {
    let token = match &payload {
        Ok(Json(body)) => body.get("token").and_then(|t| t.as_str()).unwrap_or_default(),
        Err(_) => "",
    };
    let ok = state.subscriptions.verify(token).await;
    Json(VerifyResponse { ok })
}
