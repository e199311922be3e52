use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use redis::AsyncCommands;
use std::net::SocketAddr;
use tower_cookies::{Cookie, Cookies, cookie::SameSite};

use crate::{
    crypto::csrf,
    error::AppError,
    models::audit::{AuditDraft, AuditEventType},
    services::audit::RequestContext,
    state::AppState,
};

/// Lifetime of an issued CSRF token in the Redis registry, in seconds.
const CSRF_TOKEN_TTL_SECS: u64 = 86_400;

/// Records a CSRF violation. The rejection stands even when the audit
/// pipeline itself fails; the failure is only logged.
fn record_violation(state: &AppState, req: &Request<Body>) {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ctx = RequestContext::from_parts(peer, req.headers());
    if let Err(e) = state.audit.record(
        &ctx,
        AuditDraft::failure(AuditEventType::CsrfViolation, "CSRF_REJECTED"),
    ) {
        tracing::error!("❌ Audit emission for CSRF violation failed: {}", e);
    }
}

/// Builds the non-HTTP-only CSRF cookie so client code can echo its value.
pub fn csrf_cookie(token: String, production: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new("csrf_token", token);
    cookie.set_http_only(false);
    if production {
        cookie.set_secure(true);
    }
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie
}

/// Double-submit CSRF guard.
///
/// Read-only requests (GET/HEAD/OPTIONS) are never blocked; when the CSRF
/// cookie is missing one is minted and registered, and that is the only
/// side effect. Mutating requests must echo the cookie value in the
/// `x-csrf-token` header exactly, and the token must still be registered.
pub async fn verify_csrf(
    State(mut state): State<AppState>,
    cookies: Cookies,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::GET
        || req.method() == Method::HEAD
        || req.method() == Method::OPTIONS
    {
        if cookies.get("csrf_token").is_none() {
            match issue_csrf_token(&mut state).await {
                Ok(token) => {
                    cookies.add(csrf_cookie(token, state.config.production));
                    tracing::debug!("✅ CSRF token minted for read-only request");
                }
                Err(e) => {
                    tracing::error!("❌ CSRF token issuance failed: {}", e);
                    return e.into_response();
                }
            }
        }
        return next.run(req).await;
    }

    let cookie_token = match cookies.get("csrf_token") {
        Some(c) => c.value().to_string(),
        None => {
            tracing::warn!("❌ CSRF: cookie missing on mutating request");
            record_violation(&state, &req);
            return AppError::CsrfRejected("Missing CSRF token cookie".to_string())
                .into_response();
        }
    };

    let header_token = match req
        .headers()
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
    {
        Some(t) => t.to_string(),
        None => {
            tracing::warn!("❌ CSRF: header missing or malformed on mutating request");
            record_violation(&state, &req);
            return AppError::CsrfRejected("Missing CSRF token header".to_string())
                .into_response();
        }
    };

    if !csrf::tokens_match(&cookie_token, &header_token) {
        tracing::warn!("❌ CSRF: cookie and header do not match");
        record_violation(&state, &req);
        return AppError::CsrfRejected("CSRF token mismatch".to_string()).into_response();
    }

    let csrf_key = format!("csrf:{}", cookie_token);
    let registered = state.redis.get::<_, Option<String>>(&csrf_key).await;
    match registered {
        Ok(Some(_)) => {
            tracing::debug!("✅ CSRF token valid");
            next.run(req).await
        }
        Ok(None) => {
            tracing::warn!("❌ CSRF: token expired or never issued");
            record_violation(&state, &req);
            AppError::CsrfRejected("CSRF token expired or invalid".to_string()).into_response()
        }
        Err(e) => {
            tracing::error!("❌ CSRF: Redis error: {}", e);
            AppError::CsrfRejected("CSRF validation error".to_string()).into_response()
        }
    }
}

/// Mints a fresh token and registers it in Redis with a bounded TTL.
pub async fn issue_csrf_token(state: &mut AppState) -> crate::error::Result<String> {
    let token = csrf::generate_csrf_token()?;
    let _: () = state
        .redis
        .set_ex(format!("csrf:{}", token), "valid", CSRF_TOKEN_TTL_SECS)
        .await?;
    Ok(token)
}

/// Removes a token from the registry (logout path).
pub async fn retire_csrf_token(state: &mut AppState, token: &str) {
    let _: () = state
        .redis
        .del(format!("csrf:{}", token))
        .await
        .unwrap_or(());
}
