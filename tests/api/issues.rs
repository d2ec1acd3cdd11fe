use crate::helpers::{issue_body, spawn_app};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn admin_routes_reject_missing_or_wrong_tokens() {
    // Arrange
    let test_app = spawn_app().await;
    let url = format!("{}/api/issues", test_app.address);

    // Act
    let missing = test_app
        .api_client
        .post(&url)
        .json(&issue_body("first-issue", Some("# Hello")))
        .send()
        .await
        .unwrap();
    let wrong = test_app
        .api_client
        .post(&url)
        .bearer_auth("definitely-not-the-token")
        .json(&issue_body("first-issue", Some("# Hello")))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(401, missing.status().as_u16());
    assert_eq!(401, wrong.status().as_u16());
    assert_eq!(404, test_app.get_issue("first-issue").await.status().as_u16());
}

#[tokio::test]
async fn issues_can_be_read_without_a_token() {
    // Arrange
    let test_app = spawn_app().await;
    test_app
        .post_issue(&issue_body("first-issue", Some("# Hello")))
        .await;

    // Act
    let list = test_app.get_issues().await;
    let single = test_app.get_issue("first-issue").await;

    // Assert
    assert_eq!(200, list.status().as_u16());
    assert_eq!(200, single.status().as_u16());
    let issue: serde_json::Value = single.json().await.unwrap();
    assert_eq!(issue["slug"], "first-issue");
}

#[tokio::test]
async fn issues_are_listed_newest_publication_first() {
    // Arrange
    let test_app = spawn_app().await;
    for (slug, date) in [
        ("older", "2026-09-01T09:00:00Z"),
        ("newest", "2026-10-15T09:00:00Z"),
        ("middle", "2026-10-01T09:00:00Z"),
    ] {
        let mut body = issue_body(slug, Some("# Hello"));
        body["publishingDate"] = date.into();
        assert_eq!(201, test_app.post_issue(&body).await.status().as_u16());
    }

    // Act
    let response = test_app.get_issues().await;

    // Assert
    let issues: Vec<serde_json::Value> = response.json().await.unwrap();
    let slugs: Vec<&str> = issues.iter().map(|i| i["slug"].as_str().unwrap()).collect();
    assert_eq!(slugs, vec!["newest", "middle", "older"]);
}

#[tokio::test]
async fn delete_issue_requires_a_token_and_removes_the_issue() {
    // Arrange
    let test_app = spawn_app().await;
    test_app
        .post_issue(&issue_body("first-issue", Some("# Hello")))
        .await;

    // Act
    let anonymous = test_app
        .api_client
        .delete(format!("{}/api/issues/first-issue", test_app.address))
        .send()
        .await
        .unwrap();
    let deleted = test_app.delete_issue("first-issue").await;
    let again = test_app.delete_issue("first-issue").await;

    // Assert
    assert_eq!(401, anonymous.status().as_u16());
    assert_eq!(200, deleted.status().as_u16());
    let issue: serde_json::Value = deleted.json().await.unwrap();
    assert_eq!(issue["slug"], "first-issue");
    assert_eq!(404, again.status().as_u16());
    assert_eq!(404, test_app.get_issue("first-issue").await.status().as_u16());
}

#[tokio::test]
async fn create_issue_returns_a_201_with_the_stored_issue() {
    // Arrange
    let test_app = spawn_app().await;

    // Act
    let response = test_app
        .post_issue(&issue_body("first-issue", Some("# Hello")))
        .await;

    // Assert
    assert_eq!(201, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["issue"]["slug"], "first-issue");
    assert_eq!(body["issue"]["sentToSubscribers"], false);
    assert!(body["issue"]["sentAt"].is_null());
    assert!(body.get("warning").is_none());

    let response = test_app.get_issue("first-issue").await;
    assert_eq!(200, response.status().as_u16());
    let issue: serde_json::Value = response.json().await.unwrap();
    assert_eq!(issue["title"], "First issue");
}

#[tokio::test]
async fn create_issue_rejects_invalid_bodies_and_duplicate_slugs() {
    // Arrange
    let test_app = spawn_app().await;
    let test_cases = vec![
        (serde_json::json!({ "slug": "x", "publishingDate": "2026-10-01T09:00:00Z" }), "missing title"),
        (serde_json::json!({ "title": "x", "slug": "x" }), "missing publishing date"),
        (
            serde_json::json!({ "title": " ", "slug": "x", "publishingDate": "2026-10-01T09:00:00Z" }),
            "blank title",
        ),
    ];
    for (invalid_body, error_message) in test_cases {
        // Act
        let response = test_app.post_issue(&invalid_body).await;

        // Assert
        assert_eq!(
            400,
            response.status().as_u16(),
            "The API did not fail with 400 Bad Request when the payload was {}.",
            error_message
        );
    }

    assert_eq!(
        201,
        test_app
            .post_issue(&issue_body("first-issue", None))
            .await
            .status()
            .as_u16()
    );
    assert_eq!(
        409,
        test_app
            .post_issue(&issue_body("first-issue", None))
            .await
            .status()
            .as_u16()
    );
}

#[tokio::test]
async fn update_issue_changes_only_the_given_fields() {
    // Arrange
    let test_app = spawn_app().await;
    test_app
        .post_issue(&issue_body("first-issue", Some("# Hello")))
        .await;

    // Act
    let response = test_app
        .put_issue("first-issue", &serde_json::json!({ "content": "# Hello again" }))
        .await;

    // Assert
    assert_eq!(200, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["issue"]["content"], "# Hello again");
    assert_eq!(body["issue"]["title"], "First issue");
    assert_eq!(
        404,
        test_app
            .put_issue("missing", &serde_json::json!({ "title": "x" }))
            .await
            .status()
            .as_u16()
    );
}

#[tokio::test]
async fn send_issue_delivers_to_verified_subscribers_once() {
    // Arrange
    let test_app = spawn_app().await;
    test_app.seed_verified_subscribers(3).await;
    test_app
        .post_issue(&issue_body("first-issue", Some("# Hello")))
        .await;
    Mock::given(path("/mails/bulk"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&test_app.email_server)
        .await;

    // Act
    let first = test_app.post_send_issue("first-issue").await;
    let second = test_app.post_send_issue("first-issue").await;

    // Assert
    assert_eq!(200, first.status().as_u16());
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["message"], "Newsletter sent to 3 subscribers");
    assert_eq!(body["sentCount"], 3);

    assert_eq!(409, second.status().as_u16());
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["error"], "Newsletter has already been sent to subscribers");

    let issue: serde_json::Value = test_app
        .get_issue("first-issue")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(issue["sentToSubscribers"], true);
    assert!(issue["sentAt"].is_string());
}

#[tokio::test]
async fn sent_html_is_email_safe_and_keeps_tracking_pixels() {
    // Arrange
    let test_app = spawn_app().await;
    test_app.seed_verified_subscribers(1).await;
    let content = "# Hello\n\n![cover](https://x/photo.jpg)\n\n<img src=\"https://x/track.gif\" width=\"1\" height=\"1\">\n";
    test_app
        .post_issue(&issue_body("first-issue", Some(content)))
        .await;
    Mock::given(path("/mails/bulk"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&test_app.email_server)
        .await;

    // Act
    test_app.post_send_issue("first-issue").await;

    // Assert
    let email_request = &test_app.email_server.received_requests().await.unwrap()[0];
    let body: serde_json::Value = serde_json::from_slice(&email_request.body).unwrap();
    let html = body["html"].as_str().unwrap();
    assert_eq!(body["subject"], "First issue");
    assert!(html.contains(r#"<img src="https://x/track.gif" width="1" height="1">"#));
    assert!(html.contains(r#"src="https://x/photo.jpg""#));
    assert!(html.contains("display: block;"));
    assert!(html.contains("{{unsubscribe_url}}"));
}

#[tokio::test]
async fn send_issue_reports_precondition_failures() {
    // Arrange
    let test_app = spawn_app().await;
    Mock::given(path("/mails/bulk"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&test_app.email_server)
        .await;
    test_app.post_issue(&issue_body("empty-issue", None)).await;
    test_app
        .post_issue(&issue_body("first-issue", Some("# Hello")))
        .await;

    // Act
    let missing = test_app.post_send_issue("missing").await;
    let empty = test_app.post_send_issue("empty-issue").await;
    let no_recipients = test_app.post_send_issue("first-issue").await;

    // Assert
    assert_eq!(404, missing.status().as_u16());
    assert_eq!(400, empty.status().as_u16());
    let body: serde_json::Value = empty.json().await.unwrap();
    assert_eq!(body["error"], "Issue has no content to send");
    assert_eq!(400, no_recipients.status().as_u16());
    let body: serde_json::Value = no_recipients.json().await.unwrap();
    assert_eq!(body["error"], "No verified subscribers found");
}

#[tokio::test]
async fn a_failed_send_returns_a_502_and_leaves_the_issue_unsent() {
    // Arrange
    let test_app = spawn_app().await;
    test_app.seed_verified_subscribers(2).await;
    test_app
        .post_issue(&issue_body("first-issue", Some("# Hello")))
        .await;
    Mock::given(path("/mails/bulk"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&test_app.email_server)
        .await;

    // Act
    let response = test_app.post_send_issue("first-issue").await;

    // Assert
    assert_eq!(502, response.status().as_u16());
    let issue: serde_json::Value = test_app
        .get_issue("first-issue")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(issue["sentToSubscribers"], false);
}

#[tokio::test]
async fn create_with_send_reports_a_warning_when_sending_fails() {
    // Arrange
    let test_app = spawn_app().await;
    let mut body = issue_body("first-issue", Some("# Hello"));
    body["sendToSubscribers"] = serde_json::json!(true);

    // Act
    let response = test_app.post_issue(&body).await;

    // Assert
    assert_eq!(201, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["issue"]["sentToSubscribers"], false);
    assert!(
        body["warning"]
            .as_str()
            .unwrap()
            .contains("No verified subscribers found")
    );
}

#[tokio::test]
async fn create_with_send_delivers_the_issue_immediately() {
    // Arrange
    let test_app = spawn_app().await;
    test_app.seed_verified_subscribers(1).await;
    Mock::given(path("/mails/bulk"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&test_app.email_server)
        .await;
    let mut body = issue_body("first-issue", Some("# Hello"));
    body["sendToSubscribers"] = serde_json::json!(true);

    // Act
    let response = test_app.post_issue(&body).await;

    // Assert
    assert_eq!(201, response.status().as_u16());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["issue"]["sentToSubscribers"], true);
    assert!(body.get("warning").is_none());
}
