//! HTTP surface tests.
//!
//! Drive the full axum router in-process with `oneshot`, against a fresh
//! database per test, and check status codes and JSON bodies.

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use buddy_lens::db::pool::DbPool;
use buddy_lens::db::users;
use buddy_lens::models::User;
use buddy_lens::services::mailer::RecordingMailTransport;
use buddy_lens::services::notification_sink::SqliteNotificationSink;
use buddy_lens::services::{build_router, AppState, ClaimArbiter, Notifier};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tower::ServiceExt;

struct TestApp {
    _dir: tempfile::TempDir,
    db: DbPool,
    mail: RecordingMailTransport,
    router: Router,
}

async fn test_app_with_mail(mail: RecordingMailTransport) -> TestApp {
    let dir = tempdir().unwrap();
    let db = buddy_lens::db::initialize(&dir.path().join("api.db"))
        .await
        .unwrap();

    for id in ["alice", "bob", "carol"] {
        users::upsert_user(
            &db,
            &User {
                id: id.to_string(),
                name: id.to_string(),
                email: format!("{}@example.com", id),
            },
        )
        .await
        .unwrap();
        users::insert_session(&db, &format!("{}-token", id), id, None)
            .await
            .unwrap();
    }
    users::insert_session(&db, "stale-token", "alice", Some(1))
        .await
        .unwrap();

    let notifier = Notifier::new(
        Arc::new(SqliteNotificationSink::new(db.clone())),
        Arc::new(mail.clone()),
        "http://localhost:8080",
        Duration::from_millis(200),
    );
    let state = AppState {
        db: db.clone(),
        arbiter: ClaimArbiter::new(db.clone(), Arc::new(notifier)),
    };

    TestApp {
        _dir: dir,
        router: build_router(state),
        db,
        mail,
    }
}

async fn test_app() -> TestApp {
    test_app_with_mail(RecordingMailTransport::new()).await
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn post_request(&self, token: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/buddy-lens/requests",
                Some(token),
                Some(json!({
                    "tier": "basic",
                    "cost": 10,
                    "externalLink": "https://example.com/post",
                    "questions": ["Is it clear?"]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["request"]["id"].as_str().unwrap().to_string()
    }

    async fn claim(&self, token: &str, request_id: &str, reviewer_id: &str) -> (StatusCode, Value) {
        self.send(
            Method::POST,
            "/api/buddy-lens/claim",
            Some(token),
            Some(json!({ "requestId": request_id, "reviewerId": reviewer_id })),
        )
        .await
    }

    async fn resolve(
        &self,
        token: &str,
        request_id: &str,
        requester_id: &str,
        reviewer_id: &str,
        decision: &str,
    ) -> (StatusCode, Value) {
        self.send(
            Method::PATCH,
            "/api/buddy-lens/claim",
            Some(token),
            Some(json!({
                "requestId": request_id,
                "requesterId": requester_id,
                "reviewerId": reviewer_id,
                "decision": decision
            })),
        )
        .await
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app().await;
    let (status, body) = app.send(Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_unknown_or_expired_token_is_unauthorized() {
    let app = test_app().await;

    for token in [None, Some("bogus"), Some("stale-token")] {
        let (status, body) = app
            .send(Method::GET, "/api/buddy-lens/requests/open", token, None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let app = test_app().await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/buddy-lens/requests/mine")
        .header(header::COOKIE, "buddylens_session=bob-token")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_claim_flow_and_double_claim_conflict() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;

    let (status, body) = app.claim("bob-token", &id, "bob").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request"]["status"], "PENDING");
    assert_eq!(body["request"]["pendingReviewerId"], "bob");

    let (status, body) = app.claim("carol-token", &id, "carol").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("already claimed"));
}

#[tokio::test]
async fn test_claim_as_someone_else_is_forbidden() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;

    let (status, _) = app.claim("bob-token", &id, "carol").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.claim("alice-token", &id, "alice").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_claim_unknown_request_is_not_found() {
    let app = test_app().await;
    let (status, body) = app.claim("bob-token", "no-such-request", "bob").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_approve_reports_email_sent() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;

    let (status, body) = app.resolve("alice-token", &id, "alice", "bob", "approve").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["emailSent"], true);
    assert_eq!(body["request"]["status"], "CLAIMED");
    assert_eq!(body["request"]["reviewerId"], "bob");

    let (status, _) = app.resolve("alice-token", &id, "alice", "bob", "approve").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.mail.attempts().len(), 1);
}

#[tokio::test]
async fn test_reject_with_failing_mail_still_succeeds() {
    let app = test_app_with_mail(RecordingMailTransport::failing(2)).await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;

    let (status, body) = app.resolve("alice-token", &id, "alice", "bob", "reject").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["emailSent"], false);
    assert_eq!(body["request"]["status"], "OPEN");
}

#[tokio::test]
async fn test_resolve_by_non_requester_is_forbidden() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;

    // Payload names alice but the session is carol
    let (status, _) = app.resolve("carol-token", &id, "alice", "bob", "approve").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The pending reviewer cannot approve themselves either
    let (status, _) = app.resolve("bob-token", &id, "bob", "bob", "approve").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_patch_rejects_cancel_decision() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;

    let (status, body) = app.resolve("alice-token", &id, "alice", "bob", "cancel").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_cancel_claim_reopens_request() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;

    let (status, _) = app
        .send(
            Method::DELETE,
            "/api/buddy-lens/claim",
            Some("bob-token"),
            Some(json!({ "requestId": id, "reviewerId": "bob" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            Method::DELETE,
            "/api/buddy-lens/claim",
            Some("alice-token"),
            Some(json!({ "requestId": id, "reviewerId": "bob" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["request"]["status"], "OPEN");
    assert!(app.mail.attempts().is_empty());
}

#[tokio::test]
async fn test_get_request_visibility() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;
    let uri = format!("/api/buddy-lens/requests/{}", id);

    let (status, _) = app.send(Method::GET, &uri, Some("alice-token"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(Method::GET, &uri, Some("bob-token"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(Method::GET, &uri, Some("carol-token"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(Method::GET, &format!("{}/events", uri), Some("bob-token"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_open_pool_and_withdraw() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;

    let (_, own) = app
        .send(Method::GET, "/api/buddy-lens/requests/open", Some("alice-token"), None)
        .await;
    assert!(own.as_array().unwrap().is_empty());

    let (_, pool) = app
        .send(Method::GET, "/api/buddy-lens/requests/open", Some("bob-token"), None)
        .await;
    assert_eq!(pool.as_array().unwrap().len(), 1);

    let uri = format!("/api/buddy-lens/requests/{}", id);
    let (status, _) = app.send(Method::DELETE, &uri, Some("alice-token"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, pool) = app
        .send(Method::GET, "/api/buddy-lens/requests/open", Some("bob-token"), None)
        .await;
    assert!(pool.as_array().unwrap().is_empty());

    let (status, _) = app.send(Method::GET, &uri, Some("alice-token"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_claim_leaves_inboxes_empty() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;

    for token in ["alice-token", "bob-token"] {
        let (status, inbox) = app
            .send(Method::GET, "/api/notifications", Some(token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(inbox.as_array().unwrap().is_empty());
    }
    assert!(app.mail.attempts().is_empty());
}

#[tokio::test]
async fn test_notifications_inbox_and_mark_read() {
    let app = test_app().await;
    let id = app.post_request("alice-token").await;
    app.claim("bob-token", &id, "bob").await;
    app.resolve("alice-token", &id, "alice", "bob", "reject").await;

    let (status, inbox) = app
        .send(Method::GET, "/api/notifications", Some("bob-token"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let items = inbox.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["isRead"], false);
    let notification_id = items[0]["id"].as_i64().unwrap();

    let uri = format!("/api/notifications/{}/read", notification_id);
    let (status, _) = app.send(Method::POST, &uri, Some("carol-token"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send(Method::POST, &uri, Some("bob-token"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let unread: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0")
            .bind("bob")
            .fetch_one(&app.db)
            .await
            .unwrap();
    assert_eq!(unread, 0);
}
