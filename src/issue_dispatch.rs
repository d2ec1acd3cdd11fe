//! Sends a published issue to every verified subscriber, at most once.
use crate::clock::{Clock, SystemClock};
use crate::content::{EmailLayout, RenderError, render_issue_email};
use crate::domain::IssueRef;
use crate::email_client::{BulkEmail, EmailClient, MAX_BULK_RECIPIENTS};
use crate::store::{IssueStore, SubscriberStore};
use crate::telemetry::error_chain_fmt;
use anyhow::Context;
use chrono::Duration;
use std::sync::Arc;
use tracing::{Span, field::display};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    batch_size: usize,
    claim_lease: Duration,
    layout: EmailLayout,
}

impl DispatchConfig {
    /// `batch_size` is clamped to `1..=MAX_BULK_RECIPIENTS`.
    pub fn new(batch_size: usize, claim_lease: Duration, layout: EmailLayout) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_BULK_RECIPIENTS),
            claim_lease,
            layout,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub issue_id: i64,
    pub sent_count: usize,
    pub batches: usize,
}

#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("Issue not found")]
    NotFound,
    #[error("Newsletter has already been sent to subscribers")]
    AlreadySent,
    #[error("Issue has no content to send")]
    EmptyContent,
    #[error("No verified subscribers found")]
    NoRecipients,
    #[error("Failed to render the newsletter email")]
    RenderFailed(#[source] RenderError),
    #[error("Failed to send newsletter batch {batch}")]
    DeliveryFailed {
        batch: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub struct DispatchCoordinator<S> {
    store: S,
    email_client: EmailClient,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl<S: SubscriberStore + IssueStore> DispatchCoordinator<S> {
    pub fn new(store: S, email_client: EmailClient, config: DispatchConfig) -> Self {
        Self {
            store,
            email_client,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Renders the issue once and sends it in sequential batches.
    ///
    /// The issue is flagged as sent only after every batch succeeded. A
    /// failed batch stops the dispatch; earlier batches are not recalled and
    /// the issue stays unsent.
    #[tracing::instrument(
        name = "Dispatching newsletter issue",
        skip(self),
        fields(issue_id = tracing::field::Empty, recipients = tracing::field::Empty)
    )]
    pub async fn dispatch(&self, issue: IssueRef) -> Result<DispatchReport, DispatchError> {
        let issue = self
            .store
            .find_issue(&issue)
            .await
            .context("Failed to load the issue.")?
            .ok_or(DispatchError::NotFound)?;
        Span::current().record("issue_id", display(issue.id));
        if issue.sent_to_subscribers {
            return Err(DispatchError::AlreadySent);
        }
        let content = issue.sendable_content().ok_or(DispatchError::EmptyContent)?;

        let recipients = self
            .store
            .verified_recipients()
            .await
            .context("Failed to load verified subscribers.")?;
        if recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }
        Span::current().record("recipients", recipients.len());

        let html = render_issue_email(&issue.title, content, &self.config.layout)
            .map_err(DispatchError::RenderFailed)?;

        let claimed = self
            .store
            .claim_issue_dispatch(issue.id, self.clock.now(), self.config.claim_lease)
            .await
            .context("Failed to claim the issue for dispatch.")?;
        if !claimed {
            return Err(DispatchError::AlreadySent);
        }

        let mut batches = 0;
        for (index, batch) in recipients.chunks(self.config.batch_size).enumerate() {
            let outcome = self
                .email_client
                .send_bulk(BulkEmail {
                    recipients: batch,
                    subject: &issue.title,
                    html_content: &html,
                })
                .await;
            if let Err(e) = outcome {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    batch = index + 1,
                    already_sent = index * self.config.batch_size,
                    "Failed to send a newsletter batch, aborting the dispatch"
                );
                if let Err(release_error) = self.store.release_issue_dispatch(issue.id).await {
                    tracing::error!(
                        error.cause_chain = ?release_error,
                        "Failed to release the dispatch claim"
                    );
                }
                return Err(DispatchError::DeliveryFailed {
                    batch: index + 1,
                    source: e,
                });
            }
            batches += 1;
        }

        let marked = self
            .store
            .mark_issue_sent(issue.id, self.clock.now())
            .await
            .context("Failed to mark the issue as sent.")?;
        if !marked {
            tracing::warn!("Issue was already flagged as sent when the dispatch finished");
        }

        tracing::info!(sent_count = recipients.len(), batches, "Newsletter issue sent");
        Ok(DispatchReport {
            issue_id: issue.id,
            sent_count: recipients.len(),
            batches,
        })
    }
}
