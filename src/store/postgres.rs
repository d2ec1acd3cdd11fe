use super::{IssueStore, StoreError, SubscriberStore, VerificationRequest};
use crate::domain::{
    Issue, IssueRef, IssueUpdate, NewIssue, Recipient, Subscriber, SubscriberEmail,
    SubscriberName, SubscriptionStatus, SubscriptionToken,
};
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};
use uuid::Uuid;

type PgTransaction = Transaction<'static, Postgres>;

const SUBSCRIBER_COLUMNS: &str =
    "email, name, slug, token, token_expires_at, is_verified, verified_at, created_at";
const ISSUE_COLUMNS: &str = "id, title, slug, description, content, published_at, \
    created_at, updated_at, sent_to_subscribers, sent_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriberRow {
    email: String,
    name: Option<String>,
    slug: String,
    token: String,
    token_expires_at: DateTime<Utc>,
    is_verified: bool,
    verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubscriberRow> for Subscriber {
    type Error = anyhow::Error;

    fn try_from(row: SubscriberRow) -> Result<Self, Self::Error> {
        let status = match (row.is_verified, row.verified_at) {
            (true, Some(verified_at)) => SubscriptionStatus::Verified { verified_at },
            (true, None) => anyhow::bail!("Verified subscriber without a verification time"),
            (false, _) => SubscriptionStatus::Pending,
        };
        Ok(Subscriber {
            email: SubscriberEmail::parse(row.email).map_err(anyhow::Error::msg)?,
            name: row
                .name
                .map(SubscriberName::parse)
                .transpose()
                .map_err(anyhow::Error::msg)?,
            slug: row.slug,
            token: SubscriptionToken::from(row.token),
            token_expires_at: row.token_expires_at,
            status,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecipientRow {
    email: String,
    name: Option<String>,
}

impl TryFrom<RecipientRow> for Recipient {
    type Error = anyhow::Error;

    fn try_from(row: RecipientRow) -> Result<Self, Self::Error> {
        Ok(Recipient {
            email: SubscriberEmail::parse(row.email).map_err(anyhow::Error::msg)?,
            name: row
                .name
                .map(SubscriberName::parse)
                .transpose()
                .map_err(anyhow::Error::msg)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    token: String,
    attempts: i32,
}

impl TryFrom<OutboxRow> for VerificationRequest {
    type Error = anyhow::Error;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let recipient = Recipient::try_from(RecipientRow {
            email: row.email,
            name: row.name,
        })?;
        Ok(VerificationRequest {
            id: row.id,
            recipient,
            token: SubscriptionToken::from(row.token),
            attempts: row.attempts,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IssueRow {
    id: i64,
    title: String,
    slug: String,
    description: Option<String>,
    content: Option<String>,
    published_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_to_subscribers: bool,
    sent_at: Option<DateTime<Utc>>,
}

impl From<IssueRow> for Issue {
    fn from(row: IssueRow) -> Self {
        Issue {
            id: row.id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            content: row.content,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_to_subscribers: row.sent_to_subscribers,
            sent_at: row.sent_at,
        }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}

#[async_trait::async_trait]
impl SubscriberStore for PostgresStore {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<Self::Transaction, StoreError> {
        let transaction = self
            .pool
            .begin()
            .await
            .context("Failed to acquire a Postgres connection from the pool")?;
        Ok(transaction)
    }

    async fn commit(&self, transaction: Self::Transaction) -> Result<(), StoreError> {
        transaction
            .commit()
            .await
            .context("Failed to commit SQL transaction")?;
        Ok(())
    }

    #[tracing::instrument(name = "Fetching subscriber by email", skip(self, transaction))]
    async fn find_subscriber_by_email(
        &self,
        transaction: &mut Self::Transaction,
        email: &SubscriberEmail,
    ) -> Result<Option<Subscriber>, StoreError> {
        let query = format!(
            "SELECT {} FROM subscribers WHERE email = $1 FOR UPDATE",
            SUBSCRIBER_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriberRow>(&query)
            .bind(email.as_ref())
            .fetch_optional(&mut **transaction)
            .await
            .context("Failed to fetch subscriber by email")?;
        Ok(row.map(Subscriber::try_from).transpose()?)
    }

    #[tracing::instrument(name = "Fetching subscriber by token", skip_all)]
    async fn find_subscriber_by_token(
        &self,
        transaction: &mut Self::Transaction,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Subscriber>, StoreError> {
        let query = format!(
            "SELECT {} FROM subscribers \
            WHERE token = $1 AND (is_verified OR token_expires_at > $2) \
            FOR UPDATE",
            SUBSCRIBER_COLUMNS
        );
        let row = sqlx::query_as::<_, SubscriberRow>(&query)
            .bind(token)
            .bind(now)
            .fetch_optional(&mut **transaction)
            .await
            .context("Failed to fetch subscriber by token")?;
        Ok(row.map(Subscriber::try_from).transpose()?)
    }

    #[tracing::instrument(
        name = "Saving new subscriber details in the database",
        skip_all,
        fields(subscriber_email = %subscriber.email)
    )]
    async fn insert_subscriber(
        &self,
        transaction: &mut Self::Transaction,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            INSERT INTO subscribers
                (email, name, slug, token, token_expires_at, is_verified, verified_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(subscriber.email.as_ref())
        .bind(subscriber.name.as_ref().map(AsRef::<str>::as_ref))
        .bind(&subscriber.slug)
        .bind(subscriber.token.as_ref())
        .bind(subscriber.token_expires_at)
        .bind(subscriber.is_verified())
        .bind(subscriber.verified_at())
        .bind(subscriber.created_at);
        match transaction.execute(query).await {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateEmail),
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to insert new subscriber")
                .into()),
        }
    }

    #[tracing::instrument(
        name = "Updating subscriber details in the database",
        skip_all,
        fields(subscriber_email = %subscriber.email)
    )]
    async fn update_subscriber(
        &self,
        transaction: &mut Self::Transaction,
        subscriber: &Subscriber,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE subscribers
            SET name = $2, slug = $3, token = $4, token_expires_at = $5,
                is_verified = $6, verified_at = $7
            WHERE email = $1
            "#,
        )
        .bind(subscriber.email.as_ref())
        .bind(subscriber.name.as_ref().map(AsRef::<str>::as_ref))
        .bind(&subscriber.slug)
        .bind(subscriber.token.as_ref())
        .bind(subscriber.token_expires_at)
        .bind(subscriber.is_verified())
        .bind(subscriber.verified_at());
        transaction
            .execute(query)
            .await
            .context("Failed to update subscriber")?;
        Ok(())
    }

    #[tracing::instrument(name = "Fetching verified subscribers", skip(self))]
    async fn verified_recipients(&self) -> Result<Vec<Recipient>, StoreError> {
        let rows = sqlx::query_as::<_, RecipientRow>(
            "SELECT email, name FROM subscribers WHERE is_verified ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch verified subscribers")?;
        let recipients = rows
            .into_iter()
            .map(Recipient::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipients)
    }

    #[tracing::instrument(name = "Queueing verification email", skip_all)]
    async fn enqueue_verification(
        &self,
        transaction: &mut Self::Transaction,
        request: &VerificationRequest,
    ) -> Result<(), StoreError> {
        transaction
            .execute(
                sqlx::query("DELETE FROM verification_outbox WHERE email = $1")
                    .bind(request.recipient.email.as_ref()),
            )
            .await
            .context("Failed to delete superseded verification emails")?;
        let query = sqlx::query(
            r#"
            INSERT INTO verification_outbox (id, email, name, token, attempts, created_at)
            VALUES ($1, $2, $3, $4, $5, now())
            "#,
        )
        .bind(request.id)
        .bind(request.recipient.email.as_ref())
        .bind(request.recipient.name.as_ref().map(AsRef::<str>::as_ref))
        .bind(request.token.as_ref())
        .bind(request.attempts);
        transaction
            .execute(query)
            .await
            .context("Failed to queue verification email")?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn dequeue_verification(
        &self,
    ) -> Result<Option<(Self::Transaction, VerificationRequest)>, StoreError> {
        let mut transaction = self.begin().await?;
        let row = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT id, email, name, token, attempts
            FROM verification_outbox
            ORDER BY created_at
            FOR UPDATE
            SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *transaction)
        .await
        .context("Failed to dequeue verification email")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let request = VerificationRequest::try_from(row)?;
        Ok(Some((transaction, request)))
    }

    #[tracing::instrument(skip_all)]
    async fn delete_verification(
        &self,
        mut transaction: Self::Transaction,
        id: Uuid,
    ) -> Result<(), StoreError> {
        transaction
            .execute(sqlx::query("DELETE FROM verification_outbox WHERE id = $1").bind(id))
            .await
            .context("Failed to delete verification email")?;
        self.commit(transaction).await
    }

    #[tracing::instrument(skip_all)]
    async fn record_verification_failure(
        &self,
        mut transaction: Self::Transaction,
        id: Uuid,
        error: &str,
    ) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE verification_outbox
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error);
        transaction
            .execute(query)
            .await
            .context("Failed to record verification failure")?;
        self.commit(transaction).await
    }
}

#[async_trait::async_trait]
impl IssueStore for PostgresStore {
    #[tracing::instrument(name = "Fetching issue", skip(self))]
    async fn find_issue(&self, issue: &IssueRef) -> Result<Option<Issue>, StoreError> {
        let row = match issue {
            IssueRef::Id(id) => {
                let query = format!("SELECT {} FROM issues WHERE id = $1", ISSUE_COLUMNS);
                sqlx::query_as::<_, IssueRow>(&query)
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await
            }
            IssueRef::Slug(slug) => {
                let query = format!("SELECT {} FROM issues WHERE slug = $1", ISSUE_COLUMNS);
                sqlx::query_as::<_, IssueRow>(&query)
                    .bind(slug)
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .context("Failed to fetch issue")?;
        Ok(row.map(Issue::from))
    }

    #[tracing::instrument(name = "Listing issues", skip(self))]
    async fn list_issues(&self) -> Result<Vec<Issue>, StoreError> {
        let query = format!(
            "SELECT {} FROM issues \
            ORDER BY published_at DESC, created_at DESC, id DESC",
            ISSUE_COLUMNS
        );
        let rows = sqlx::query_as::<_, IssueRow>(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list issues")?;
        Ok(rows.into_iter().map(Issue::from).collect())
    }

    #[tracing::instrument(name = "Saving new issue", skip(self, issue), fields(slug = %issue.slug))]
    async fn insert_issue(
        &self,
        issue: &NewIssue,
        now: DateTime<Utc>,
    ) -> Result<Issue, StoreError> {
        let query = format!(
            "INSERT INTO issues (title, slug, description, content, published_at, created_at, updated_at) \
            VALUES ($1, $2, $3, $4, $5, $6, $6) \
            RETURNING {}",
            ISSUE_COLUMNS
        );
        let outcome = sqlx::query_as::<_, IssueRow>(&query)
            .bind(&issue.title)
            .bind(&issue.slug)
            .bind(&issue.description)
            .bind(&issue.content)
            .bind(issue.published_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await;
        match outcome {
            Ok(row) => Ok(row.into()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateSlug),
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to insert new issue")
                .into()),
        }
    }

    #[tracing::instrument(name = "Updating issue", skip(self, update))]
    async fn update_issue(
        &self,
        slug: &str,
        update: &IssueUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Issue>, StoreError> {
        let query = format!(
            "UPDATE issues SET \
                title = COALESCE($2, title), \
                slug = COALESCE($3, slug), \
                description = COALESCE($4, description), \
                content = COALESCE($5, content), \
                published_at = COALESCE($6, published_at), \
                updated_at = $7 \
            WHERE slug = $1 \
            RETURNING {}",
            ISSUE_COLUMNS
        );
        let outcome = sqlx::query_as::<_, IssueRow>(&query)
            .bind(slug)
            .bind(&update.title)
            .bind(&update.slug)
            .bind(&update.description)
            .bind(&update.content)
            .bind(update.published_at)
            .bind(now)
            .fetch_optional(&self.pool)
            .await;
        match outcome {
            Ok(row) => Ok(row.map(Issue::from)),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateSlug),
            Err(e) => Err(anyhow::Error::new(e)
                .context("Failed to update issue")
                .into()),
        }
    }

    #[tracing::instrument(name = "Deleting issue", skip(self))]
    async fn delete_issue(&self, slug: &str) -> Result<Option<Issue>, StoreError> {
        let query = format!("DELETE FROM issues WHERE slug = $1 RETURNING {}", ISSUE_COLUMNS);
        let row = sqlx::query_as::<_, IssueRow>(&query)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to delete issue")?;
        Ok(row.map(Issue::from))
    }

    #[tracing::instrument(name = "Claiming issue dispatch", skip(self))]
    async fn claim_issue_dispatch(
        &self,
        id: i64,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE issues
            SET dispatch_claimed_at = $2
            WHERE id = $1
                AND NOT sent_to_subscribers
                AND (dispatch_claimed_at IS NULL OR dispatch_claimed_at < $3)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(now - lease)
        .execute(&self.pool)
        .await
        .context("Failed to claim issue dispatch")?;
        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(name = "Releasing issue dispatch", skip(self))]
    async fn release_issue_dispatch(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE issues SET dispatch_claimed_at = NULL WHERE id = $1 AND NOT sent_to_subscribers",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to release issue dispatch")?;
        Ok(())
    }

    #[tracing::instrument(name = "Marking issue as sent", skip(self))]
    async fn mark_issue_sent(&self, id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE issues
            SET sent_to_subscribers = TRUE, sent_at = $2, dispatch_claimed_at = NULL
            WHERE id = $1 AND NOT sent_to_subscribers
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to mark issue as sent")?;
        Ok(result.rows_affected() == 1)
    }
}
