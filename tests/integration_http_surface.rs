//! Router-level tests that drive the HTTP surface in-process through tower.
//!
//! Requires live PostgreSQL and Redis; every test skips itself when
//! DATABASE_URL or REDIS_URL is unset. Schema is applied on first use.

use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use chrono::Duration;
use http::{Request, Response, StatusCode, header};
use std::net::SocketAddr;
use tokio::sync::OnceCell;
use tower::ServiceExt;
use uuid::Uuid;
use zeroize::Zeroizing;

use authcore::{config::Config, routes, state::AppState};

static SCHEMA: OnceCell<()> = OnceCell::const_new();

fn test_config(database_url: &str, redis_url: &str) -> Config {
    Config {
        database_url: database_url.to_string(),
        redis_url: redis_url.to_string(),
        master_key: Zeroizing::new(vec![7u8; 32]),
        max_active_keys: 3,
        key_expiration: Duration::days(90),
        rotation_interval: Duration::days(30),
        refresh_token_expiry: Duration::days(7),
        rotation_threshold: Duration::hours(24),
        max_sessions_per_user: 3,
        session_ttl: Duration::hours(24),
        oauth_state_ttl: Duration::minutes(10),
        audit_logging_enabled: true,
        include_audit_metadata: false,
        audit_hash_salt: "integration-test-salt".to_string(),
        production: false,
    }
}

/// Returns the wired router, or `None` when the live services are absent.
async fn app() -> Option<axum::Router> {
    let (Ok(db_url), Ok(redis_url)) =
        (std::env::var("DATABASE_URL"), std::env::var("REDIS_URL"))
    else {
        eprintln!("DATABASE_URL/REDIS_URL not set; skipping HTTP surface test");
        return None;
    };

    let config = test_config(&db_url, &redis_url);
    let state = AppState::new(&config).await.expect("state construction failed");

    let pool = state.db.clone();
    SCHEMA
        .get_or_init(|| async move {
            let client = pool.get().await.expect("database unreachable");
            client
                .batch_execute(include_str!("../schema.sql"))
                .await
                .expect("schema application failed");
        })
        .await;

    Some(routes::router(state))
}

fn peer() -> SocketAddr {
    "127.0.0.1:55000".parse().unwrap()
}

/// Builds a request carrying connection info, the way the server would.
fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap();
    req.extensions_mut().insert(ConnectInfo(peer()));
    req
}

/// Extracts the `csrf_token` cookie value from a response, if set.
fn csrf_cookie_value(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookie| {
            cookie
                .strip_prefix("csrf_token=")
                .and_then(|rest| rest.split(';').next())
                .map(|value| value.to_string())
        })
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn read_only_request_mints_csrf_cookie() {
    let Some(app) = app().await else { return };

    let response = app
        .oneshot(request("GET", "/api/auth/csrf", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let token = csrf_cookie_value(&response).expect("guard must mint a csrf cookie");
    assert_eq!(token.len(), 43);
}

#[tokio::test]
async fn mutating_request_without_token_is_rejected() {
    let Some(app) = app().await else { return };

    let body = serde_json::json!({ "user_id": Uuid::new_v4() }).to_string();
    let response = app
        .oneshot(request("POST", "/api/auth/sessions", Body::from(body)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["code"], "CSRF_REJECTED");
}

#[tokio::test]
async fn mismatched_double_submit_pair_is_rejected() {
    let Some(app) = app().await else { return };

    let minted = app
        .clone()
        .oneshot(request("GET", "/api/auth/csrf", Body::empty()))
        .await
        .unwrap();
    let token = csrf_cookie_value(&minted).expect("guard must mint a csrf cookie");

    let body = serde_json::json!({ "user_id": Uuid::new_v4() }).to_string();
    let mut req = request("POST", "/api/auth/sessions", Body::from(body));
    req.headers_mut().insert(
        header::COOKIE,
        format!("csrf_token={token}").parse().unwrap(),
    );
    req.headers_mut()
        .insert("x-csrf-token", "not-the-cookie-value".parse().unwrap());

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["code"], "CSRF_REJECTED");
}

#[tokio::test]
async fn double_submit_pair_admits_session_issuance() {
    let Some(app) = app().await else { return };

    let minted = app
        .clone()
        .oneshot(request("GET", "/api/auth/csrf", Body::empty()))
        .await
        .unwrap();
    let token = csrf_cookie_value(&minted).expect("guard must mint a csrf cookie");

    let body = serde_json::json!({ "user_id": Uuid::new_v4() }).to_string();
    let mut req = request("POST", "/api/auth/sessions", Body::from(body));
    req.headers_mut().insert(
        header::COOKIE,
        format!("csrf_token={token}").parse().unwrap(),
    );
    req.headers_mut()
        .insert("x-csrf-token", token.parse().unwrap());

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let session_cookie = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|cookie| cookie.starts_with("session_id="));
    assert!(session_cookie, "issuance must set the session cookie");

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["refresh_token"].as_str().unwrap().len(), 43);
}
