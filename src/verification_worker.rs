//! Delivers queued verification emails when subscriptions use outbox delivery.
use crate::configuration::Settings;
use crate::email_client::EmailClient;
use crate::startup::get_connection_pool;
use crate::store::{PostgresStore, SubscriberStore};
use crate::subscription_lifecycle::{LifecycleConfig, send_verification_email};
use std::time::Duration;
use tracing::{Span, field::display};

#[derive(Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    TaskCompleted,
    EmptyQueue,
}

pub async fn run_worker_until_stopped(configuration: Settings) -> Result<(), anyhow::Error> {
    let store = PostgresStore::new(get_connection_pool(&configuration.database));
    let email_client = configuration.email_client.client();
    let lifecycle = configuration.lifecycle_config();
    worker_loop(
        store,
        email_client,
        lifecycle,
        configuration.subscriptions.outbox_max_attempts,
    )
    .await
}

async fn worker_loop<S: SubscriberStore>(
    store: S,
    email_client: EmailClient,
    lifecycle: LifecycleConfig,
    max_attempts: i32,
) -> Result<(), anyhow::Error> {
    loop {
        match try_execute_task(&store, &email_client, &lifecycle, max_attempts).await {
            Ok(ExecutionOutcome::EmptyQueue) => {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            Err(_) => {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Ok(ExecutionOutcome::TaskCompleted) => {}
        }
    }
}

/// Sends the oldest queued verification email.
///
/// A failed send stays queued with its attempt counter bumped and is
/// reported as an error. Requests that already failed `max_attempts`
/// times are dropped.
#[tracing::instrument(
    skip_all,
    fields(
        verification_id = tracing::field::Empty,
        subscriber_email = tracing::field::Empty
    ),
    err
)]
pub async fn try_execute_task<S: SubscriberStore>(
    store: &S,
    email_client: &EmailClient,
    lifecycle: &LifecycleConfig,
    max_attempts: i32,
) -> Result<ExecutionOutcome, anyhow::Error> {
    let task = store.dequeue_verification().await?;
    let Some((transaction, request)) = task else {
        return Ok(ExecutionOutcome::EmptyQueue);
    };
    Span::current()
        .record("verification_id", display(request.id))
        .record("subscriber_email", display(&request.recipient.email));

    if request.attempts >= max_attempts {
        tracing::error!(
            attempts = request.attempts,
            "Dropping a verification email after too many failed attempts"
        );
        store.delete_verification(transaction, request.id).await?;
        return Ok(ExecutionOutcome::TaskCompleted);
    }

    let outcome = send_verification_email(
        email_client,
        &lifecycle.verification_template_id,
        &lifecycle.base_url,
        &request.recipient,
        &request.token,
    )
    .await;
    match outcome {
        Ok(()) => {
            store.delete_verification(transaction, request.id).await?;
            Ok(ExecutionOutcome::TaskCompleted)
        }
        Err(e) => {
            store
                .record_verification_failure(transaction, request.id, &e.to_string())
                .await?;
            Err(anyhow::Error::new(e).context("Failed to deliver a verification email"))
        }
    }
}
