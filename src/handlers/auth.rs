use axum::{
    Extension, Json,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_cookies::{Cookie, Cookies, cookie::SameSite, cookie::time::Duration};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware_layer::auth::CurrentSession,
    middleware_layer::csrf as csrf_guard,
    models::audit::{AuditDraft, AuditEventType},
    models::session::DeviceInfo,
    services::audit::RequestContext,
    state::AppState,
    validation::auth::*,
};

/// The request payload for issuing a session.
///
/// Primary authentication (password or OAuth profile verification) happens
/// upstream; this endpoint is handed an already-verified user id.
#[derive(Deserialize, Debug)]
pub struct IssueSessionRequest {
    pub user_id: Uuid,
    pub device_info: Option<DeviceInfo>,
}

/// The request payload for a refresh call.
#[derive(Deserialize, Debug)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// The request payload for logout.
#[derive(Deserialize, Debug, Default)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// The request payload for starting an OAuth handshake.
#[derive(Deserialize, Debug)]
pub struct OAuthStartRequest {
    pub provider: String,
    pub state: String,
    pub metadata: Option<String>,
}

/// The request payload for completing an OAuth handshake.
#[derive(Deserialize, Debug)]
pub struct OAuthCompleteRequest {
    pub provider: String,
    pub state: String,
}

#[derive(Serialize)]
pub struct IssueSessionResponse {
    pub success: bool,
    pub refresh_token: String,
    pub session_expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub user_id: Uuid,
    pub rotated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize)]
pub struct OAuthStartResponse {
    pub session_id: String,
    pub provider: String,
    pub state: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct OAuthCompleteResponse {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Creates the HTTP-only session cookie.
fn session_cookie(session_id: String, max_age_secs: i64, production: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new("session_id", session_id);
    cookie.set_http_only(true);
    if production {
        cookie.set_secure(true);
    }
    cookie.set_same_site(SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie.set_path("/");
    cookie
}

/// Issues a session and refresh token for an already-authenticated user.
#[axum::debug_handler]
pub async fn issue_session(
    State(mut state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    cookies: Cookies,
    Json(payload): Json<IssueSessionRequest>,
) -> Result<Response> {
    let ctx = RequestContext::from_parts(Some(peer), &headers);

    let device_info = payload.device_info.unwrap_or_default();
    validate_device_info(&device_info)?;

    let ip = state.audit.resolve_client_ip(&ctx)?.to_string();

    let token = match state
        .tokens
        .create_refresh_token(payload.user_id, Some(device_info.clone()), Some(ip.clone()))
        .await
    {
        Ok(token) => token,
        Err(e @ AppError::SessionLimitExceeded(_)) => {
            state.audit.record(
                &ctx,
                AuditDraft::failure(AuditEventType::Login, e.code()),
            )?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let session = state
        .sessions
        .create_session(payload.user_id, Some(device_info), Some(ip))
        .await?;

    let max_age_secs = (session.expires_at - Utc::now()).num_seconds();
    cookies.add(session_cookie(
        session.session_id.clone(),
        max_age_secs,
        state.config.production,
    ));

    let csrf_token = csrf_guard::issue_csrf_token(&mut state).await?;
    cookies.add(csrf_guard::csrf_cookie(csrf_token, state.config.production));

    state.audit.record(
        &ctx,
        AuditDraft::success(AuditEventType::Login, payload.user_id),
    )?;
    tracing::info!("✅ Session and refresh token issued for user {}", payload.user_id);

    let response = IssueSessionResponse {
        success: true,
        refresh_token: token.token_value,
        session_expires_at: session.expires_at,
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Read-only endpoint whose only purpose is to let the CSRF guard mint a
/// token cookie for clients that do not hold one yet.
#[axum::debug_handler]
pub async fn csrf_token() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Verifies a refresh token, transparently rotating it past the threshold.
#[axum::debug_handler]
pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<RefreshRequest>,
) -> Result<Response> {
    let ctx = RequestContext::from_parts(Some(peer), &headers);

    let Some(verification) = state.tokens.verify_refresh_token(&payload.refresh_token).await?
    else {
        state.audit.record(
            &ctx,
            AuditDraft::failure(AuditEventType::TokenRefresh, "UNAUTHENTICATED"),
        )?;
        return Err(AppError::Authentication("Invalid refresh token".to_string()));
    };

    let rotated = verification.replacement.is_some();
    let event_type = if rotated {
        AuditEventType::TokenRotated
    } else {
        AuditEventType::TokenRefresh
    };
    state.audit.record(
        &ctx,
        AuditDraft::success(event_type, verification.user_id),
    )?;

    let response = RefreshResponse {
        user_id: verification.user_id,
        rotated,
        refresh_token: verification.replacement.map(|t| t.token_value),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles user logout: revokes the session, the presented refresh token,
/// and the CSRF registration, then clears the cookies.
#[axum::debug_handler]
pub async fn logout(
    State(mut state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(session): Extension<CurrentSession>,
    cookies: Cookies,
    payload: Option<Json<LogoutRequest>>,
) -> Result<Response> {
    let ctx = RequestContext::from_parts(Some(peer), &headers);
    let Json(payload) = payload.unwrap_or_default();

    state.sessions.revoke_session(&session.session_id).await?;

    if let Some(refresh_token) = &payload.refresh_token {
        state.tokens.revoke_refresh_token(refresh_token, None).await?;
        state.audit.record(
            &ctx,
            AuditDraft::success(AuditEventType::TokenRevoked, session.user_id),
        )?;
    }

    if let Some(csrf_cookie) = cookies.get("csrf_token") {
        csrf_guard::retire_csrf_token(&mut state, csrf_cookie.value()).await;
    }

    let mut session_cookie = Cookie::new("session_id", "");
    session_cookie.set_max_age(Duration::seconds(0));
    session_cookie.set_path("/");
    cookies.remove(session_cookie);

    let mut csrf_cookie = Cookie::new("csrf_token", "");
    csrf_cookie.set_max_age(Duration::seconds(0));
    csrf_cookie.set_path("/");
    cookies.remove(csrf_cookie);

    state.audit.record(
        &ctx,
        AuditDraft::success(AuditEventType::Logout, session.user_id),
    )?;
    tracing::info!("✅ User logged out: {}", session.user_id);

    let response = StatusResponse {
        success: true,
        message: "Logout successful".to_string(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Logout-everywhere: revokes every live session and refresh token of the
/// current user.
#[axum::debug_handler]
pub async fn logout_all(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Extension(session): Extension<CurrentSession>,
) -> Result<Response> {
    let ctx = RequestContext::from_parts(Some(peer), &headers);

    let tokens = state.tokens.revoke_all_user_tokens(session.user_id).await?;
    let sessions = state
        .sessions
        .revoke_all_user_sessions(session.user_id)
        .await?;

    state.audit.record(
        &ctx,
        AuditDraft::success(AuditEventType::LogoutAll, session.user_id),
    )?;
    tracing::info!(
        "✅ Logout-everywhere for user {}: {} token(s), {} session(s)",
        session.user_id,
        tokens,
        sessions
    );

    let response = StatusResponse {
        success: true,
        message: "All sessions revoked".to_string(),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Starts an OAuth handshake: stores the state nonce for the callback.
#[axum::debug_handler]
pub async fn oauth_start(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<OAuthStartRequest>,
) -> Result<Response> {
    let ctx = RequestContext::from_parts(Some(peer), &headers);

    validate_provider(&payload.provider)?;
    validate_state(&payload.state)?;
    if let Some(metadata) = &payload.metadata {
        validate_metadata(metadata)?;
    }

    let session = state
        .sessions
        .create_oauth_state_session(payload.provider, payload.state, payload.metadata)
        .await?;

    state.audit.record(
        &ctx,
        AuditDraft::anonymous_success(AuditEventType::OauthStart)
            .with_provider(&session.provider),
    )?;

    let response = OAuthStartResponse {
        session_id: session.session_id,
        provider: session.provider,
        state: session.state,
        expires_at: session.expires_at,
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Completes an OAuth handshake: consumes the state nonce exactly once.
#[axum::debug_handler]
pub async fn oauth_complete(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<OAuthCompleteRequest>,
) -> Result<Response> {
    let ctx = RequestContext::from_parts(Some(peer), &headers);

    validate_provider(&payload.provider)?;
    validate_state(&payload.state)?;

    let Some(session) = state
        .sessions
        .consume_oauth_state_session(&payload.provider, &payload.state)
        .await?
    else {
        state.audit.record(
            &ctx,
            AuditDraft::failure(AuditEventType::OauthCallback, "UNAUTHENTICATED")
                .with_provider(&payload.provider),
        )?;
        return Err(AppError::Authentication(
            "Unknown or already-consumed handshake state".to_string(),
        ));
    };

    state.audit.record(
        &ctx,
        AuditDraft::anonymous_success(AuditEventType::OauthCallback)
            .with_provider(&session.provider),
    )?;
    tracing::info!("✅ OAuth handshake state consumed for {}", session.provider);

    let response = OAuthCompleteResponse {
        session_id: session.session_id,
        metadata: session.metadata,
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}
