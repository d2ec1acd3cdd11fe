//! Moves a subscriber from "unknown" to "pending" to "verified".
use crate::clock::{Clock, SystemClock};
use crate::configuration::VerificationDelivery;
use crate::domain::{NewSubscriber, Recipient, Subscriber, SubscriptionToken};
use crate::email_client::{EmailClient, TemplatedEmail};
use crate::store::{StoreError, SubscriberStore, VerificationRequest};
use crate::telemetry::error_chain_fmt;
use anyhow::Context;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub token_ttl: Duration,
    pub delivery: VerificationDelivery,
    pub verification_template_id: String,
    /// Verification links are built on top of this.
    pub base_url: String,
}

/// Raw, untrusted input for [`SubscriptionManager::subscribe`].
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub email: String,
    pub name: Option<String>,
    pub slug: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingSubscription {
    /// A subscriber record was created.
    Created,
    /// An expired pending record got a fresh token.
    Renewed,
}

#[derive(thiserror::Error)]
pub enum SubscribeError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("This email is already subscribed.")]
    AlreadySubscribed,
    #[error("You're almost there. Please confirm your subscription from the email we sent.")]
    VerificationPending,
    #[error("We couldn't send the verification email. Please try again in a moment.")]
    DeliveryFailed(#[source] reqwest::Error),
    #[error(transparent)]
    UnexpectedError(#[from] anyhow::Error),
}

impl std::fmt::Debug for SubscribeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

pub struct SubscriptionManager<S> {
    store: S,
    email_client: EmailClient,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
}

impl<S: SubscriberStore> SubscriptionManager<S> {
    pub fn new(store: S, email_client: EmailClient, config: LifecycleConfig) -> Self {
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

    /// Creates or renews a pending subscription and sends its verification email.
    ///
    /// With immediate delivery the email goes out before the transaction
    /// commits, so a failed send leaves the stored state untouched.
    #[tracing::instrument(
        name = "Adding a new subscriber",
        skip(self, request),
        fields(
            subscriber_email = %request.email,
            slug = %request.slug
        )
    )]
    pub async fn subscribe(
        &self,
        request: SubscriptionRequest,
    ) -> Result<PendingSubscription, SubscribeError> {
        let new_subscriber = NewSubscriber::parse(request.email, request.name, request.slug)
            .map_err(SubscribeError::InvalidInput)?;
        let now = self.clock.now();
        let ttl = self.config.token_ttl;

        let mut transaction = self
            .store
            .begin()
            .await
            .context("Failed to begin a transaction to store a subscriber.")?;
        let existing = self
            .store
            .find_subscriber_by_email(&mut transaction, &new_subscriber.email)
            .await
            .context("Failed to look up the subscriber.")?;

        let token = SubscriptionToken::generate();
        let (subscriber, outcome) = match existing {
            None => {
                let subscriber = Subscriber::pending(new_subscriber, token, now, ttl);
                match self.store.insert_subscriber(&mut transaction, &subscriber).await {
                    Ok(()) => {}
                    // Lost a race with a concurrent first subscription.
                    Err(StoreError::DuplicateEmail) => {
                        return Err(SubscribeError::VerificationPending);
                    }
                    Err(e) => {
                        return Err(anyhow::Error::new(e)
                            .context("Failed to insert new subscriber in the database.")
                            .into());
                    }
                }
                (subscriber, PendingSubscription::Created)
            }
            Some(subscriber) if subscriber.is_verified() => {
                return Err(SubscribeError::AlreadySubscribed);
            }
            Some(subscriber) if subscriber.token_is_live(now) => {
                return Err(SubscribeError::VerificationPending);
            }
            Some(mut subscriber) => {
                subscriber.reissue(new_subscriber, token, now, ttl);
                self.store
                    .update_subscriber(&mut transaction, &subscriber)
                    .await
                    .context("Failed to renew the subscription token.")?;
                (subscriber, PendingSubscription::Renewed)
            }
        };

        match self.config.delivery {
            VerificationDelivery::Immediate => {
                send_verification_email(
                    &self.email_client,
                    &self.config.verification_template_id,
                    &self.config.base_url,
                    &subscriber.recipient(),
                    &subscriber.token,
                )
                .await
                .map_err(SubscribeError::DeliveryFailed)?;
            }
            VerificationDelivery::Outbox => {
                let request =
                    VerificationRequest::new(subscriber.recipient(), subscriber.token.clone());
                self.store
                    .enqueue_verification(&mut transaction, &request)
                    .await
                    .context("Failed to queue the verification email.")?;
            }
        }

        self.store
            .commit(transaction)
            .await
            .context("Failed to commit SQL transaction to store a new subscriber.")?;
        Ok(outcome)
    }

    /// Marks the owner of a live token as verified.
    ///
    /// Returns `true` for the owner of a token that was already used
    /// successfully. Unknown, expired and superseded tokens return `false`,
    /// and so does any storage failure.
    #[tracing::instrument(name = "Verifying a subscriber", skip_all)]
    pub async fn verify(&self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() {
            return false;
        }
        match self.try_verify(token).await {
            Ok(verified) => verified,
            Err(e) => {
                tracing::error!(
                    error.cause_chain = ?e,
                    error.message = %e,
                    "Failed to verify a subscription token"
                );
                false
            }
        }
    }

    async fn try_verify(&self, token: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut transaction = self.store.begin().await?;
        let Some(mut subscriber) = self
            .store
            .find_subscriber_by_token(&mut transaction, token, now)
            .await?
        else {
            return Ok(false);
        };
        if subscriber.is_verified() {
            return Ok(true);
        }
        subscriber.verify(now);
        self.store
            .update_subscriber(&mut transaction, &subscriber)
            .await?;
        self.store.commit(transaction).await?;
        tracing::info!(subscriber_email = %subscriber.email, "Subscriber verified");
        Ok(true)
    }
}

pub fn verification_link(base_url: &str, token: &SubscriptionToken) -> String {
    format!(
        "{}/?verification-token={}",
        base_url.trim_end_matches('/'),
        token.as_ref()
    )
}

#[tracing::instrument(
    name = "Send a verification email to a new subscriber",
    skip(email_client, template_id, base_url, token)
)]
pub async fn send_verification_email(
    email_client: &EmailClient,
    template_id: &str,
    base_url: &str,
    recipient: &Recipient,
    token: &SubscriptionToken,
) -> Result<(), reqwest::Error> {
    let variables = HashMap::from([
        ("name".to_string(), recipient.greeting_name().to_string()),
        ("link".to_string(), verification_link(base_url, token)),
    ]);
    email_client
        .send_templated(TemplatedEmail {
            recipient,
            template_id,
            variables: &variables,
        })
        .await
}
