use crate::helpers::spawn_app;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

async fn subscribe(test_app: &crate::helpers::TestApp) -> String {
    Mock::given(path("/mails/send"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&test_app.email_server)
        .await;
    let response = test_app
        .post_subscribers(&serde_json::json!({
            "email": "ursula_le_guin@gmail.com",
            "slug": "first-issue"
        }))
        .await;
    assert_eq!(201, response.status().as_u16());
    test_app.last_verification_token().await
}

#[tokio::test]
async fn the_link_returned_by_subscribe_verifies_the_subscriber() {
    // Arrange
    let test_app = spawn_app().await;
    let token = subscribe(&test_app).await;

    // Act
    let ok = test_app.verify_token(&token).await;

    // Assert
    assert!(ok);
    let saved = test_app
        .store
        .subscriber("ursula_le_guin@gmail.com")
        .await
        .unwrap();
    assert!(saved.is_verified());
    assert!(saved.verified_at().is_some());
}

#[tokio::test]
async fn clicking_the_link_twice_is_still_ok() {
    // Arrange
    let test_app = spawn_app().await;
    let token = subscribe(&test_app).await;
    assert!(test_app.verify_token(&token).await);
    let verified_at = test_app
        .store
        .subscriber("ursula_le_guin@gmail.com")
        .await
        .unwrap()
        .verified_at();

    // Act
    let ok = test_app.verify_token(&token).await;

    // Assert
    assert!(ok);
    let saved = test_app
        .store
        .subscriber("ursula_le_guin@gmail.com")
        .await
        .unwrap();
    assert_eq!(saved.verified_at(), verified_at);
}

#[tokio::test]
async fn unknown_and_expired_tokens_are_rejected_with_a_200() {
    // Arrange
    let test_app = spawn_app().await;
    let expired = test_app
        .seed_expired_subscriber("ursula_le_guin@gmail.com", 1)
        .await;

    // Act + Assert
    assert!(!test_app.verify_token(&expired).await);
    assert!(!test_app.verify_token("not-a-token").await);
    assert!(!test_app.verify_token("   ").await);
    let saved = test_app
        .store
        .subscriber("ursula_le_guin@gmail.com")
        .await
        .unwrap();
    assert!(!saved.is_verified());
}

#[tokio::test]
async fn malformed_bodies_are_answered_with_ok_false() {
    // Arrange
    let test_app = spawn_app().await;
    let test_cases = vec![
        serde_json::json!({}),
        serde_json::json!({ "token": 42 }),
        serde_json::json!("just a string"),
    ];

    for body in test_cases {
        // Act
        let response = test_app.post_verify(&body).await;

        // Assert
        assert_eq!(200, response.status().as_u16());
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], false);
    }

    let response = test_app
        .api_client
        .post(format!("{}/api/subscribers/verify", test_app.address))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(200, response.status().as_u16());
}
