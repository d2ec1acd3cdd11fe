use crate::clock::{Clock, SystemClock};
use crate::domain::{Issue, IssueRef, IssueUpdate, NewIssue};
use crate::issue_dispatch::DispatchCoordinator;
use crate::store::{IssueStore, StoreError, SubscriberStore};
use crate::telemetry::error_chain_fmt;
use anyhow::Context;
use std::sync::Arc;

/// An issue as stored after a write, plus what went wrong with the
/// optional send that followed it.
#[derive(Debug, Clone)]
pub struct SavedIssue {
    pub issue: Issue,
    pub warning: Option<String>,
}

#[derive(thiserror::Error)]
pub enum AuthoringError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("An issue with this slug already exists")]
    DuplicateSlug,
    #[error("Issue not found")]
    NotFound,
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for AuthoringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl From<StoreError> for AuthoringError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateSlug => AuthoringError::DuplicateSlug,
            e => AuthoringError::UnexpectedError(anyhow::Error::new(e)),
        }
    }
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Creates and edits issues, optionally sending them right after the write.
pub struct IssueAuthoring<S> {
    store: S,
    dispatcher: Arc<DispatchCoordinator<S>>,
    clock: Arc<dyn Clock>,
}

impl<S: SubscriberStore + IssueStore> IssueAuthoring<S> {
    pub fn new(store: S, dispatcher: Arc<DispatchCoordinator<S>>) -> Self {
        Self {
            store,
            dispatcher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[tracing::instrument(name = "Creating a newsletter issue", skip(self, new_issue), fields(slug = %new_issue.slug))]
    pub async fn create(
        &self,
        new_issue: NewIssue,
        send_to_subscribers: bool,
    ) -> Result<SavedIssue, AuthoringError> {
        if is_blank(&new_issue.title) || is_blank(&new_issue.slug) {
            return Err(AuthoringError::InvalidInput(
                "'title', 'slug' and 'publishingDate' are required".into(),
            ));
        }
        let issue = self
            .store
            .insert_issue(&new_issue, self.clock.now())
            .await?;
        self.send_after_save(issue, send_to_subscribers).await
    }

    #[tracing::instrument(name = "Updating a newsletter issue", skip(self, update))]
    pub async fn update(
        &self,
        slug: &str,
        update: IssueUpdate,
        send_to_subscribers: bool,
    ) -> Result<SavedIssue, AuthoringError> {
        let blank_title = update.title.as_deref().is_some_and(is_blank);
        let blank_slug = update.slug.as_deref().is_some_and(is_blank);
        if blank_title || blank_slug {
            return Err(AuthoringError::InvalidInput(
                "'title' and 'slug' cannot be blank".into(),
            ));
        }
        let issue = self
            .store
            .update_issue(slug, &update, self.clock.now())
            .await?
            .ok_or(AuthoringError::NotFound)?;
        self.send_after_save(issue, send_to_subscribers).await
    }

    pub async fn get(&self, slug: &str) -> Result<Issue, AuthoringError> {
        self.store
            .find_issue(&IssueRef::Slug(slug.to_owned()))
            .await?
            .ok_or(AuthoringError::NotFound)
    }

    /// Every issue, most recently published first.
    pub async fn list(&self) -> Result<Vec<Issue>, AuthoringError> {
        Ok(self.store.list_issues().await?)
    }

    #[tracing::instrument(name = "Deleting a newsletter issue", skip(self))]
    pub async fn delete(&self, slug: &str) -> Result<Issue, AuthoringError> {
        self.store
            .delete_issue(slug)
            .await?
            .ok_or(AuthoringError::NotFound)
    }

    /// A failed send never fails the write; it becomes a warning instead.
    async fn send_after_save(
        &self,
        issue: Issue,
        send_to_subscribers: bool,
    ) -> Result<SavedIssue, AuthoringError> {
        if !send_to_subscribers {
            return Ok(SavedIssue {
                issue,
                warning: None,
            });
        }
        match self.dispatcher.dispatch(IssueRef::Id(issue.id)).await {
            Ok(report) => {
                tracing::info!(sent_count = report.sent_count, "Issue sent after save");
                let issue = self
                    .store
                    .find_issue(&IssueRef::Id(report.issue_id))
                    .await
                    .context("Failed to reload the issue after sending it.")?
                    .ok_or(AuthoringError::NotFound)?;
                Ok(SavedIssue {
                    issue,
                    warning: None,
                })
            }
            Err(e) => {
                tracing::warn!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Issue saved but not sent to subscribers"
                );
                Ok(SavedIssue {
                    issue,
                    warning: Some(format!(
                        "Issue saved, but it was not sent to subscribers: {}",
                        e
                    )),
                })
            }
        }
    }
}
