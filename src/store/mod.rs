//! Persistence for subscribers, issues and the verification outbox.
//!
//! Every state transition the lifecycle and dispatch modules make goes
//! through these traits, so the same logic runs against Postgres in
//! production and against [`InMemoryStore`] in tests.
mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

use crate::domain::{
    Issue, IssueRef, IssueUpdate, NewIssue, Recipient, Subscriber, SubscriberEmail,
    SubscriptionToken,
};
use crate::telemetry::error_chain_fmt;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

#[derive(thiserror::Error)]
pub enum StoreError {
    #[error("A subscriber with this email already exists")]
    DuplicateEmail,
    #[error("An issue with this slug already exists")]
    DuplicateSlug,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl std::fmt::Debug for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// A verification email waiting in the outbox.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub id: Uuid,
    pub recipient: Recipient,
    pub token: SubscriptionToken,
    pub attempts: i32,
}

impl VerificationRequest {
    pub fn new(recipient: Recipient, token: SubscriptionToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient,
            token,
            attempts: 0,
        }
    }
}

/// Subscriber records and the verification outbox.
///
/// Reads made through a transaction lock the rows they return until the
/// transaction is committed or dropped. Dropping a transaction rolls it back.
#[async_trait::async_trait]
pub trait SubscriberStore: Send + Sync {
    type Transaction: Send;

    async fn begin(&self) -> Result<Self::Transaction, StoreError>;

    async fn commit(&self, transaction: Self::Transaction) -> Result<(), StoreError>;

    async fn find_subscriber_by_email(
        &self,
        transaction: &mut Self::Transaction,
        email: &SubscriberEmail,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// The owner of `token`, provided the token is still live or its owner
    /// has already verified with it.
    async fn find_subscriber_by_token(
        &self,
        transaction: &mut Self::Transaction,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError>;

    /// Fails with [`StoreError::DuplicateEmail`] if the email is taken.
    async fn insert_subscriber(
        &self,
        transaction: &mut Self::Transaction,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError>;

    /// Overwrites the record with the same email.
    async fn update_subscriber(
        &self,
        transaction: &mut Self::Transaction,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError>;

    /// Every verified subscriber, oldest first.
    async fn verified_recipients(&self) -> Result<Vec<Recipient>, StoreError>;

    /// Queues a verification email, replacing any older one for the same address.
    async fn enqueue_verification(
        &self,
        transaction: &mut Self::Transaction,
        request: &VerificationRequest,
    ) -> Result<(), StoreError>;

    /// Locks the oldest queued request not already held by another worker.
    async fn dequeue_verification(
        &self,
    ) -> Result<Option<(Self::Transaction, VerificationRequest)>, StoreError>;

    /// Removes a request and commits.
    async fn delete_verification(
        &self,
        transaction: Self::Transaction,
        id: Uuid,
    ) -> Result<(), StoreError>;

    /// Bumps the attempt counter, records the error and commits.
    async fn record_verification_failure(
        &self,
        transaction: Self::Transaction,
        id: Uuid,
        error: &str,
    ) -> Result<(), StoreError>;
}

/// Newsletter issues and their one-way "sent" flag.
#[async_trait::async_trait]
pub trait IssueStore: Send + Sync {
    async fn find_issue(&self, issue: &IssueRef) -> Result<Option<Issue>, StoreError>;

    /// Every issue, most recently published first.
    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError>;

    /// Fails with [`StoreError::DuplicateSlug`] if the slug is taken.
    async fn insert_issue(
        &self,
        issue: &NewIssue,
        now: DateTime<Utc>,
    ) -> Result<Issue, StoreError>;

    /// `None` when no issue has this slug.
    async fn update_issue(
        &self,
        slug: &str,
        update: &IssueUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Issue>, StoreError>;

    /// Removes the issue and returns it as it was; `None` when no issue has this slug.
    async fn delete_issue(&self, slug: &str) -> Result<Option<Issue>, StoreError>;

    /// Takes the exclusive right to dispatch an unsent issue.
    ///
    /// Returns `false` when the issue is already sent or another dispatch
    /// holds a claim younger than `lease`.
    async fn claim_issue_dispatch(
        &self,
        id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    async fn release_issue_dispatch(&self, id: i64) -> Result<(), StoreError>;

    /// Flips `sent_to_subscribers` from false to true.
    /// Returns `false` if it was already true.
    async fn mark_issue_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Everything the application needs from a backend.
pub trait Store: SubscriberStore + IssueStore + Clone + 'static {}

impl<T> Store for T where T: SubscriberStore + IssueStore + Clone + 'static {}
