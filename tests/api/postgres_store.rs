use crate::helpers::spawn_postgres_store;
use chrono::{DateTime, Duration, Utc};
use claims::{assert_matches, assert_none, assert_ok, assert_some};
use newsletter::domain::{
    IssueRef, IssueUpdate, NewIssue, NewSubscriber, Subscriber, SubscriberEmail,
    SubscriptionToken,
};
use newsletter::store::{IssueStore, PostgresStore, StoreError, SubscriberStore, VerificationRequest};

fn pending(email: &str, now: DateTime<Utc>) -> Subscriber {
    let new_subscriber =
        NewSubscriber::parse(email.into(), Some("Ursula".into()), "first-issue".into()).unwrap();
    Subscriber::pending(
        new_subscriber,
        SubscriptionToken::generate(),
        now,
        Duration::minutes(10),
    )
}

fn new_issue(slug: &str, published_at: DateTime<Utc>) -> NewIssue {
    NewIssue {
        title: "First issue".into(),
        slug: slug.into(),
        description: None,
        content: Some("# Hello".into()),
        published_at,
    }
}

async fn save(store: &PostgresStore, subscriber: &Subscriber) {
    let mut transaction = store.begin().await.unwrap();
    store
        .insert_subscriber(&mut transaction, subscriber)
        .await
        .unwrap();
    store.commit(transaction).await.unwrap();
}

async fn find_by_token(
    store: &PostgresStore,
    token: &str,
    now: DateTime<Utc>,
) -> Option<Subscriber> {
    let mut transaction = store.begin().await.unwrap();
    store
        .find_subscriber_by_token(&mut transaction, token, now)
        .await
        .unwrap()
}

#[tokio::test]
async fn a_second_subscriber_with_the_same_email_is_a_duplicate() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let subscriber = pending("ursula@example.com", Utc::now());
    save(&store, &subscriber).await;

    // Act
    let mut transaction = store.begin().await.unwrap();
    let outcome = store.insert_subscriber(&mut transaction, &subscriber).await;

    // Assert
    assert_matches!(outcome, Err(StoreError::DuplicateEmail));
}

#[tokio::test]
async fn dropped_transactions_leave_nothing_behind() {
    // Arrange
    let (store, pool) = spawn_postgres_store().await;
    let subscriber = pending("ursula@example.com", Utc::now());

    // Act
    let mut transaction = store.begin().await.unwrap();
    store
        .insert_subscriber(&mut transaction, &subscriber)
        .await
        .unwrap();
    drop(transaction);

    // Assert
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn token_lookup_honours_expiry_renewal_and_verification() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let now = Utc::now();
    let mut subscriber = pending("ursula@example.com", now);
    let first_token = subscriber.token.as_ref().to_owned();
    save(&store, &subscriber).await;

    // Live until the TTL runs out
    assert_some!(find_by_token(&store, &first_token, now + Duration::minutes(9)).await);
    assert_none!(find_by_token(&store, &first_token, now + Duration::minutes(10)).await);

    // A renewal supersedes the old token
    let renewed_at = now + Duration::minutes(11);
    let renewal =
        NewSubscriber::parse("ursula@example.com".into(), None, "first-issue".into()).unwrap();
    subscriber.reissue(
        renewal,
        SubscriptionToken::generate(),
        renewed_at,
        Duration::minutes(10),
    );
    let second_token = subscriber.token.as_ref().to_owned();
    let mut transaction = store.begin().await.unwrap();
    store
        .update_subscriber(&mut transaction, &subscriber)
        .await
        .unwrap();
    store.commit(transaction).await.unwrap();
    assert_none!(find_by_token(&store, &first_token, renewed_at).await);

    // Verifying burns the token, but its owner can still be found with it
    subscriber.verify(renewed_at + Duration::minutes(1));
    let mut transaction = store.begin().await.unwrap();
    store
        .update_subscriber(&mut transaction, &subscriber)
        .await
        .unwrap();
    store.commit(transaction).await.unwrap();

    // Act
    let found = find_by_token(&store, &second_token, renewed_at + Duration::days(30)).await;

    // Assert
    let found = found.expect("A verified owner should be found by its token");
    assert!(found.is_verified());
    assert_some!(found.verified_at());
    assert_eq!(found.email, SubscriberEmail::parse("ursula@example.com".into()).unwrap());
}

#[tokio::test]
async fn only_verified_subscribers_are_recipients() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let now = Utc::now();
    let mut verified = pending("verified@example.com", now);
    verified.verify(now);
    save(&store, &verified).await;
    save(&store, &pending("pending@example.com", now)).await;

    // Act
    let recipients = store.verified_recipients().await.unwrap();

    // Assert
    assert_eq!(recipients.len(), 1);
    assert_eq!(recipients[0].email.as_ref(), "verified@example.com");
}

#[tokio::test]
async fn a_dequeued_verification_is_hidden_from_other_workers() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let recipient = pending("ursula@example.com", Utc::now()).recipient();
    let request = VerificationRequest::new(recipient, SubscriptionToken::generate());
    let mut transaction = store.begin().await.unwrap();
    store
        .enqueue_verification(&mut transaction, &request)
        .await
        .unwrap();
    store.commit(transaction).await.unwrap();

    // Act
    let (held, dequeued) = store.dequeue_verification().await.unwrap().unwrap();
    let while_held = store.dequeue_verification().await.unwrap();

    // Assert
    assert_eq!(dequeued.id, request.id);
    assert!(while_held.is_none());
    store
        .record_verification_failure(held, request.id, "provider unavailable")
        .await
        .unwrap();
    let (held, retried) = store.dequeue_verification().await.unwrap().unwrap();
    assert_eq!(retried.attempts, 1);
    store.delete_verification(held, request.id).await.unwrap();
    assert!(store.dequeue_verification().await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_slugs_are_rejected_on_insert_and_update() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let now = Utc::now();
    store
        .insert_issue(&new_issue("first-issue", now), now)
        .await
        .unwrap();
    store
        .insert_issue(&new_issue("second-issue", now), now)
        .await
        .unwrap();

    // Act
    let inserted = store.insert_issue(&new_issue("first-issue", now), now).await;
    let renamed = store
        .update_issue(
            "second-issue",
            &IssueUpdate {
                slug: Some("first-issue".into()),
                ..Default::default()
            },
            now,
        )
        .await;

    // Assert
    assert_matches!(inserted, Err(StoreError::DuplicateSlug));
    assert_matches!(renamed, Err(StoreError::DuplicateSlug));
}

#[tokio::test]
async fn only_one_of_two_concurrent_claims_wins() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let now = Utc::now();
    let lease = Duration::minutes(30);
    let issue = store
        .insert_issue(&new_issue("first-issue", now), now)
        .await
        .unwrap();

    // Act
    let (first, second) = tokio::join!(
        store.claim_issue_dispatch(issue.id, now, lease),
        store.claim_issue_dispatch(issue.id, now, lease),
    );

    // Assert
    let winners = [first.unwrap(), second.unwrap()]
        .into_iter()
        .filter(|claimed| *claimed)
        .count();
    assert_eq!(winners, 1);
    // A stale claim can be taken over, a released one immediately
    let early = now + Duration::minutes(29);
    let stale = now + Duration::minutes(31);
    assert!(!store.claim_issue_dispatch(issue.id, early, lease).await.unwrap());
    assert!(store.claim_issue_dispatch(issue.id, stale, lease).await.unwrap());
    store.release_issue_dispatch(issue.id).await.unwrap();
    assert!(store.claim_issue_dispatch(issue.id, now, lease).await.unwrap());
}

#[tokio::test]
async fn an_issue_is_marked_sent_exactly_once() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let now = Utc::now();
    let lease = Duration::minutes(30);
    let issue = store
        .insert_issue(&new_issue("first-issue", now), now)
        .await
        .unwrap();
    assert!(store.claim_issue_dispatch(issue.id, now, lease).await.unwrap());

    // Act
    let first = store.mark_issue_sent(issue.id, now).await.unwrap();
    let second = store.mark_issue_sent(issue.id, now).await.unwrap();

    // Assert
    assert!(first);
    assert!(!second);
    let stored = store
        .find_issue(&IssueRef::Id(issue.id))
        .await
        .unwrap()
        .unwrap();
    assert!(stored.sent_to_subscribers);
    assert_some!(stored.sent_at);
    // A sent issue can never be claimed again, not even after the lease
    assert!(
        !store
            .claim_issue_dispatch(issue.id, now + Duration::days(1), lease)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn issues_are_listed_newest_first_and_can_be_deleted() {
    // Arrange
    let (store, _pool) = spawn_postgres_store().await;
    let now = Utc::now();
    store
        .insert_issue(&new_issue("older", now - Duration::days(7)), now)
        .await
        .unwrap();
    store
        .insert_issue(&new_issue("newer", now), now)
        .await
        .unwrap();

    // Act
    let listed = store.list_issues().await.unwrap();
    let deleted = assert_ok!(store.delete_issue("older").await);

    // Assert
    let slugs: Vec<&str> = listed.iter().map(|issue| issue.slug.as_str()).collect();
    assert_eq!(slugs, vec!["newer", "older"]);
    assert_eq!(deleted.map(|issue| issue.slug).as_deref(), Some("older"));
    assert_none!(store.delete_issue("older").await.unwrap());
    assert_eq!(store.list_issues().await.unwrap().len(), 1);
}
