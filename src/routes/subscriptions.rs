use crate::startup::AppState;
use crate::store::Store;
use crate::subscription_lifecycle::{PendingSubscription, SubscribeError, SubscriptionRequest};
use crate::utils::{e400, e500, json_error};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

#[derive(serde::Deserialize)]
pub struct SubscribeBody {
    #[serde(default)]
    email: String,
    name: Option<String>,
    #[serde(default)]
    slug: String,
}

impl IntoResponse for SubscribeError {
    fn into_response(self) -> Response {
        match self {
            SubscribeError::InvalidInput(_) => e400(self),
            SubscribeError::AlreadySubscribed | SubscribeError::VerificationPending => {
                json_error(StatusCode::CONFLICT, self.to_string())
            }
            SubscribeError::DeliveryFailed(_) => {
                tracing::error!(
                    error.cause_chain = ?self,
                    "Failed to send the verification email"
                );
                json_error(StatusCode::BAD_GATEWAY, self.to_string())
            }
            SubscribeError::UnexpectedError(_) => e500(self),
        }
    }
}

/// Subscribe to the newsletter
///
/// Creates a pending subscription, or renews an expired one, and sends
/// the verification email.
#[tracing::instrument(name = "Handling a subscription request", skip(state, payload))]
pub async fn subscribe<S: Store>(
    State(state): State<AppState<S>>,
    payload: Result<Json<SubscribeBody>, JsonRejection>,
) -> Result<Response, SubscribeError> {
    let Json(body) = payload.map_err(|e| SubscribeError::InvalidInput(e.body_text()))?;
    let outcome = state
        .subscriptions
        .subscribe(SubscriptionRequest {
            email: body.email,
            name: body.name,
            slug: body.slug,
        })
        .await?;
    let (status, message) = match outcome {
        PendingSubscription::Created => (
            StatusCode::CREATED,
            "You're almost there. Please check your email to confirm.",
        ),
        PendingSubscription::Renewed => (
            StatusCode::OK,
            "Subscription request renewed. Please check your email to confirm.",
        ),
    };
    Ok((status, Json(serde_json::json!({ "message": message }))).into_response())
}
