use super::{IssueStore, StoreError, SubscriberStore, VerificationRequest};
use crate::domain::{
    Issue, IssueRef, IssueUpdate, NewIssue, Recipient, Subscriber, SubscriberEmail,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredIssue {
    issue: Issue,
    dispatch_claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct QueuedVerification {
    request: VerificationRequest,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct State {
    subscribers: Vec<Subscriber>,
    issues: Vec<StoredIssue>,
    last_issue_id: i64,
    outbox: Vec<QueuedVerification>,
}

impl State {
    fn subscriber_mut(&mut self, email: &SubscriberEmail) -> Option<&mut Subscriber> {
        self.subscribers.iter_mut().find(|s| &s.email == email)
    }

    fn issue_mut(&mut self, id: i64) -> Option<&mut StoredIssue> {
        self.issues.iter_mut().find(|stored| stored.issue.id == id)
    }
}

/// Keeps everything in process memory.
///
/// A transaction holds the store-wide lock and works on a copy of the
/// state; committing swaps the copy in. This serializes writers the same
/// way row locks do for concurrent requests touching the same email.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriber(&self, email: &str) -> Option<Subscriber> {
        let state = self.state.lock().await;
        state
            .subscribers
            .iter()
            .find(|s| s.email.as_ref() == email)
            .cloned()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    /// Stores a subscriber as-is, bypassing the lifecycle.
    pub async fn seed_subscriber(&self, subscriber: Subscriber) {
        self.state.lock().await.subscribers.push(subscriber);
    }

    pub async fn queued_verifications(&self) -> Vec<VerificationRequest> {
        let state = self.state.lock().await;
        state.outbox.iter().map(|q| q.request.clone()).collect()
    }

    pub async fn last_verification_error(&self, id: Uuid) -> Option<String> {
        let state = self.state.lock().await;
        state
            .outbox
            .iter()
            .find(|q| q.request.id == id)
            .and_then(|q| q.last_error.clone())
    }
}

#[async_trait::async_trait]
impl SubscriberStore for InMemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTransaction { guard, staged })
    }

    async fn commit(&self, mut transaction: Self::Transaction) -> Result<(), StoreError> {
        *transaction.guard = transaction.staged;
        Ok(())
    }

    async fn find_subscriber_by_email(
        &self,
        transaction: &mut Self::Transaction,
        email: &SubscriberEmail,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(transaction.staged.subscriber_mut(email).cloned())
    }

    async fn find_subscriber_by_token(
        &self,
        transaction: &mut Self::Transaction,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        Ok(transaction
            .staged
            .subscribers
            .iter()
            .find(|s| s.token.as_ref() == token && (s.is_verified() || s.token_is_live(now)))
            .cloned())
    }

    async fn insert_subscriber(
        &self,
        transaction: &mut Self::Transaction,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError> {
        let staged = &mut transaction.staged;
        if staged.subscriber_mut(&subscriber.email).is_some() {
            return Err(StoreError::DuplicateEmail);
        }
        staged.subscribers.push(subscriber.clone());
        Ok(())
    }

    async fn update_subscriber(
        &self,
        transaction: &mut Self::Transaction,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError> {
        let stored = transaction
            .staged
            .subscriber_mut(&subscriber.email)
            .ok_or_else(|| anyhow::anyhow!("No subscriber to update"))?;
        *stored = subscriber.clone();
        Ok(())
    }

    async fn verified_recipients(&self) -> Result<Vec<Recipient>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .subscribers
            .iter()
            .filter(|s| s.is_verified())
            .map(Subscriber::recipient)
            .collect())
    }

    async fn enqueue_verification(
        &self,
        transaction: &mut Self::Transaction,
        request: &VerificationRequest,
    ) -> Result<(), StoreError> {
        let outbox = &mut transaction.staged.outbox;
        outbox.retain(|q| q.request.recipient.email != request.recipient.email);
        outbox.push(QueuedVerification {
            request: request.clone(),
            last_error: None,
        });
        Ok(())
    }

    async fn dequeue_verification(
        &self,
    ) -> Result<Option<(Self::Transaction, VerificationRequest)>, StoreError> {
        let transaction = self.begin().await?;
        let Some(next) = transaction.staged.outbox.first() else {
            return Ok(None);
        };
        let request = next.request.clone();
        Ok(Some((transaction, request)))
    }

    async fn delete_verification(
        &self,
        mut transaction: Self::Transaction,
        id: Uuid,
    ) -> Result<(), StoreError> {
        transaction.staged.outbox.retain(|q| q.request.id != id);
        self.commit(transaction).await
    }

    async fn record_verification_failure(
        &self,
        mut transaction: Self::Transaction,
        id: Uuid,
        error: &str,
    ) -> Result<(), StoreError> {
        if let Some(queued) = transaction
            .staged
            .outbox
            .iter_mut()
            .find(|q| q.request.id == id)
        {
            queued.request.attempts += 1;
            queued.last_error = Some(error.to_owned());
        }
        self.commit(transaction).await
    }
}

#[async_trait::async_trait]
impl IssueStore for InMemoryStore {
    async fn find_issue(&self, issue: &IssueRef) -> Result<Option<Issue>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .issues
            .iter()
            .map(|stored| &stored.issue)
            .find(|stored| match issue {
                IssueRef::Id(id) => stored.id == *id,
                IssueRef::Slug(slug) => &stored.slug == slug,
            })
            .cloned())
    }

    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        let state = self.state.lock().await;
        let mut issues: Vec<Issue> = state
            .issues
            .iter()
            .map(|stored| stored.issue.clone())
            .collect();
        issues.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        Ok(issues)
    }

    async fn insert_issue(
        &self,
        issue: &NewIssue,
        now: DateTime<Utc>,
    ) -> Result<Issue, StoreError> {
        let mut state = self.state.lock().await;
        if state.issues.iter().any(|stored| stored.issue.slug == issue.slug) {
            return Err(StoreError::DuplicateSlug);
        }
        state.last_issue_id += 1;
        let issue = Issue {
            id: state.last_issue_id,
            title: issue.title.clone(),
            slug: issue.slug.clone(),
            description: issue.description.clone(),
            content: issue.content.clone(),
            published_at: issue.published_at,
            created_at: now,
            updated_at: now,
            sent_to_subscribers: false,
            sent_at: None,
        };
        state.issues.push(StoredIssue {
            issue: issue.clone(),
            dispatch_claimed_at: None,
        });
        Ok(issue)
    }

    async fn update_issue(
        &self,
        slug: &str,
        update: &IssueUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Issue>, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(new_slug) = &update.slug {
            let taken = state
                .issues
                .iter()
                .any(|stored| &stored.issue.slug == new_slug && stored.issue.slug != slug);
            if taken {
                return Err(StoreError::DuplicateSlug);
            }
        }
        let Some(stored) = state.issues.iter_mut().find(|s| s.issue.slug == slug) else {
            return Ok(None);
        };
        let issue = &mut stored.issue;
        if let Some(title) = &update.title {
            issue.title = title.clone();
        }
        if let Some(slug) = &update.slug {
            issue.slug = slug.clone();
        }
        if let Some(description) = &update.description {
            issue.description = Some(description.clone());
        }
        if let Some(content) = &update.content {
            issue.content = Some(content.clone());
        }
        if let Some(published_at) = update.published_at {
            issue.published_at = published_at;
        }
        issue.updated_at = now;
        Ok(Some(issue.clone()))
    }

    async fn delete_issue(&self, slug: &str) -> Result<Option<Issue>, StoreError> {
        let mut state = self.state.lock().await;
        let Some(position) = state.issues.iter().position(|s| s.issue.slug == slug) else {
            return Ok(None);
        };
        Ok(Some(state.issues.remove(position).issue))
    }

    async fn claim_issue_dispatch(
        &self,
        id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.issue_mut(id) else {
            return Ok(false);
        };
        let claim_is_free = stored
            .dispatch_claimed_at
            .is_none_or(|claimed_at| claimed_at < now - lease);
        if stored.issue.sent_to_subscribers || !claim_is_free {
            return Ok(false);
        }
        stored.dispatch_claimed_at = Some(now);
        Ok(true)
    }

    async fn release_issue_dispatch(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state.issue_mut(id) {
            stored.dispatch_claimed_at = None;
        }
        Ok(())
    }

    async fn mark_issue_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(stored) = state.issue_mut(id) else {
            return Ok(false);
        };
        if stored.issue.sent_to_subscribers {
            return Ok(false);
        }
        stored.issue.sent_to_subscribers = true;
        stored.issue.sent_at = Some(now);
        stored.dispatch_claimed_at = None;
        Ok(true)
    }
}
