//! Router-level integration tests exercising the end-to-end scenarios this
//! lineage's test harness always covers for an HTTP layer: drive the
//! assembled Axum router via `tower::ServiceExt::oneshot`, with every
//! lower layer (Ownership Store, user file) backed by a real
//! `tempfile::tempdir()` and the Container Driver backed by the
//! in-workspace stub so no container engine is required.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use portal_core::config::Config;
use portal_gateway::directory::DirectoryVerifier;
use portal_gateway::identity::IdentityVerifier;
use portal_gateway::routes::build_router;
use portal_gateway::state::AppState;
use portal_gateway::workspace::NullWorkspaceFiles;
use portal_harness::shutdown::ShutdownSignal;
use portal_registry::driver::stub::StubContainerDriver;
use portal_registry::driver::ContainerDriver;
use portal_registry::{PortAllocator, SessionRegistry, SessionRegistryConfig};
use portal_store::{OwnershipStore, TokenStore, UserStore};

struct Harness {
    state: Arc<AppState>,
}

impl Harness {
    fn build(tmp: &tempfile::TempDir, max_sessions_per_user: u32) -> Self {
        let ownership = Arc::new(
            OwnershipStore::load(tmp.path().join("ownership.tsv")).expect("load ownership store"),
        );
        let users = Arc::new(UserStore::load(tmp.path().join("users.json")).expect("load users"));
        users.create("alice", "correct-password").unwrap();
        users.create("bob", "bob-password").unwrap();
        let identity = Arc::new(IdentityVerifier::new(users, None::<DirectoryVerifier>));
        let tokens = Arc::new(TokenStore::new(24));

        let driver: Arc<dyn ContainerDriver> = Arc::new(StubContainerDriver::new());
        let registry = Arc::new(SessionRegistry::new(
            SessionRegistryConfig {
                max_sessions_per_user,
                ready_timeout: Duration::from_secs(1),
                container_image: "portal-terminal:latest".to_string(),
                container_memory_mb: 256,
                container_cpu_quota: 1.0,
                workspace_root: "/tmp/portal-workspaces".to_string(),
            },
            PortAllocator::new(20000, 20009),
            ownership.clone(),
            driver,
        ));

        let state = Arc::new(AppState::new(
            Arc::new(Config::default()),
            registry,
            ownership,
            tokens,
            identity,
            Arc::new(NullWorkspaceFiles),
            ShutdownSignal::new(),
        ));

        Self { state }
    }

    fn router(&self) -> axum::Router {
        build_router(self.state.clone())
    }
}

async fn body_json(resp: axum::http::Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).expect("response body should be JSON")
}

/// Extract the `name=value` pair from a `Set-Cookie` response header so it
/// can be replayed as a `Cookie` request header on the next call.
fn extract_cookie(resp: &axum::http::Response<Body>) -> String {
    let raw = resp
        .headers()
        .get(axum::http::header::SET_COOKIE)
        .expect("response should set a cookie")
        .to_str()
        .unwrap();
    raw.split(';').next().unwrap().to_string()
}

async fn login(router: &axum::Router, username: &str, password: &str) -> String {
    let body = format!("username={username}&password={password}");
    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SEE_OTHER, "login should redirect on success");
    extract_cookie(&resp)
}

async fn create_session(router: &axum::Router, cookie: &str) -> String {
    let req = Request::builder()
        .method("POST")
        .uri("/session/new")
        .header("cookie", cookie)
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    json["id"].as_str().unwrap().to_string()
}

// Scenario 1: login, create a session, check its status.
#[tokio::test]
async fn login_then_create_then_status() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 4);
    let router = harness.router();

    let cookie = login(&router, "alice", "correct-password").await;
    let id = create_session(&router, &cookie).await;
    assert_eq!(harness.state.ownership.get(id.parse().unwrap()).as_deref(), Some("alice"));

    let req = Request::builder()
        .uri(format!("/session/{id}/status"))
        .header("cookie", cookie.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert!(matches!(json["state"].as_str(), Some("running") | Some("starting")));
}

// Scenario: login with a wrong password is rejected with a generic message.
#[tokio::test]
async fn login_with_wrong_password_is_unauthorized() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 4);
    let router = harness.router();

    let req = Request::builder()
        .method("POST")
        .uri("/login")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("username=alice&password=wrong"))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// Scenario 3: a second user cannot read another user's session status.
#[tokio::test]
async fn ownership_mismatch_is_forbidden() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 4);
    let router = harness.router();

    let alice_cookie = login(&router, "alice", "correct-password").await;
    let id = create_session(&router, &alice_cookie).await;

    let bob_cookie = login(&router, "bob", "bob-password").await;
    let req = Request::builder()
        .uri(format!("/session/{id}/status"))
        .header("cookie", bob_cookie.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

// Scenario 5: quota is enforced and does not mutate existing sessions.
#[tokio::test]
async fn quota_exceeded_leaves_existing_sessions_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 1);
    let router = harness.router();

    let cookie = login(&router, "alice", "correct-password").await;
    let first_id = create_session(&router, &cookie).await;

    let req = Request::builder()
        .method("POST")
        .uri("/session/new")
        .header("cookie", cookie.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    // The first session is unaffected.
    let req = Request::builder()
        .uri(format!("/session/{first_id}/status"))
        .header("cookie", cookie.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// Scenario 6: batch status reports both a live and a nonexistent session.
#[tokio::test]
async fn batch_status_reports_gone_for_unknown_id() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 4);
    let router = harness.router();

    let cookie = login(&router, "alice", "correct-password").await;
    let id = create_session(&router, &cookie).await;

    let body = serde_json::json!({ "session_ids": [id, "0".repeat(32)] });
    let req = Request::builder()
        .method("POST")
        .uri("/sessions/status")
        .header("cookie", cookie.as_str())
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["sessions"][&id]["status"], "running");
    assert_eq!(json["sessions"]["0".repeat(32)]["status"], "gone");
}

// Scenario 4: delete schedules teardown and returns 204 promptly even while
// a Registry handle could still be outstanding.
#[tokio::test]
async fn delete_returns_no_content_and_session_then_reports_gone() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 4);
    let router = harness.router();

    let cookie = login(&router, "alice", "correct-password").await;
    let id = create_session(&router, &cookie).await;

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/session/{id}"))
        .header("cookie", cookie.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = Request::builder()
        .uri(format!("/session/{id}/status"))
        .header("cookie", cookie.as_str())
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// A request with no session cookie at all is unauthenticated, not forbidden.
#[tokio::test]
async fn missing_cookie_is_unauthenticated() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 4);
    let router = harness.router();

    let req = Request::builder()
        .method("POST")
        .uri("/session/new")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn healthz_and_readyz_do_not_require_auth() {
    let tmp = tempfile::tempdir().unwrap();
    let harness = Harness::build(&tmp, 4);
    let router = harness.router();

    let resp = router
        .clone()
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = router
        .oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
