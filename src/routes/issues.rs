use crate::authoring::{AuthoringError, SavedIssue};
use crate::domain::{Issue, IssueRef, IssueUpdate, NewIssue};
use crate::issue_dispatch::DispatchError;
use crate::startup::AppState;
use crate::store::Store;
use crate::utils::{e400, e500, json_error};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIssueBody {
    #[serde(flatten)]
    issue: NewIssue,
    #[serde(default)]
    send_to_subscribers: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIssueBody {
    #[serde(flatten)]
    update: IssueUpdate,
    #[serde(default)]
    send_to_subscribers: bool,
}

#[derive(Serialize)]
pub struct IssueResponse {
    issue: Issue,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

impl From<SavedIssue> for IssueResponse {
    fn from(saved: SavedIssue) -> Self {
        Self {
            issue: saved.issue,
            warning: saved.warning,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    message: String,
    sent_count: usize,
}

impl IntoResponse for AuthoringError {
    fn into_response(self) -> Response {
        match self {
            AuthoringError::InvalidInput(_) => e400(self),
            AuthoringError::DuplicateSlug => json_error(StatusCode::CONFLICT, self.to_string()),
            AuthoringError::NotFound => json_error(StatusCode::NOT_FOUND, self.to_string()),
            AuthoringError::UnexpectedError(_) => e500(self),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match self {
            DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, self.to_string()),
            DispatchError::AlreadySent => json_error(StatusCode::CONFLICT, self.to_string()),
            DispatchError::EmptyContent | DispatchError::NoRecipients => {
                json_error(StatusCode::BAD_REQUEST, self.to_string())
            }
            DispatchError::DeliveryFailed { .. } => {
                tracing::error!(error.cause_chain = ?self, "Failed to send newsletter");
                json_error(StatusCode::BAD_GATEWAY, self.to_string())
            }
            DispatchError::RenderFailed(_) | DispatchError::UnexpectedError(_) => e500(self),
        }
    }
}

/// Admin: Create a newsletter issue
///
/// Optionally sends it to verified subscribers right away. A failed send
/// does not fail the request; it is reported in `warning`.
#[tracing::instrument(name = "Admin: Create issue", skip(state, payload))]
pub async fn create_issue<S: Store>(
    State(state): State<AppState<S>>,
    payload: Result<Json<CreateIssueBody>, JsonRejection>,
) -> Result<Response, AuthoringError> {
    let Json(body) = payload.map_err(|e| AuthoringError::InvalidInput(e.body_text()))?;
    let saved = state
        .authoring
        .create(body.issue, body.send_to_subscribers)
        .await?;
    Ok((StatusCode::CREATED, Json(IssueResponse::from(saved))).into_response())
}

/// Admin: Update a newsletter issue
#[tracing::instrument(name = "Admin: Update issue", skip(state, payload))]
pub async fn update_issue<S: Store>(
    State(state): State<AppState<S>>,
    Path(slug): Path<String>,
    payload: Result<Json<UpdateIssueBody>, JsonRejection>,
) -> Result<Json<IssueResponse>, AuthoringError> {
    let Json(body) = payload.map_err(|e| AuthoringError::InvalidInput(e.body_text()))?;
    let saved = state
        .authoring
        .update(&slug, body.update, body.send_to_subscribers)
        .await?;
    Ok(Json(saved.into()))
}

/// List published issues, newest first
#[tracing::instrument(name = "List issues", skip(state))]
pub async fn list_issues<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<Vec<Issue>>, AuthoringError> {
    Ok(Json(state.authoring.list().await?))
}

#[tracing::instrument(name = "Get issue", skip(state))]
pub async fn get_issue<S: Store>(
    State(state): State<AppState<S>>,
    Path(slug): Path<String>,
) -> Result<Json<Issue>, AuthoringError> {
    let issue = state.authoring.get(&slug).await?;
    Ok(Json(issue))
}

/// Admin: Delete an issue, answering with the removed record
#[tracing::instrument(name = "Admin: Delete issue", skip(state))]
pub async fn delete_issue<S: Store>(
    State(state): State<AppState<S>>,
    Path(slug): Path<String>,
) -> Result<Json<Issue>, AuthoringError> {
    let issue = state.authoring.delete(&slug).await?;
    Ok(Json(issue))
}

/// Admin: Send an issue to every verified subscriber
#[tracing::instrument(name = "Admin: Send issue", skip(state))]
pub async fn send_issue<S: Store>(
    State(state): State<AppState<S>>,
    Path(slug): Path<String>,
) -> Result<Json<SendResponse>, DispatchError> {
    let report = state.dispatcher.dispatch(IssueRef::Slug(slug)).await?;
    Ok(Json(SendResponse {
        message: format!("Newsletter sent to {} subscribers", report.sent_count),
        sent_count: report.sent_count,
    }))
}
