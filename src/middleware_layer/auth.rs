use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{models::session::DeviceInfo, state::AppState};

/// The session resolved by `require_auth`, injected as a request extension.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    /// The authenticated user.
    pub user_id: Uuid,
    /// The opaque session identifier from the cookie.
    pub session_id: String,
}

/// Extracts the opaque session id from the request cookies.
fn extract_session_id(cookies: &Cookies) -> Option<String> {
    cookies.get("session_id").map(|cookie| cookie.value().to_string())
}

/// A middleware that requires a valid session to be present.
///
/// Resolves the session through the store (which enforces expiry and
/// revocation), bumps its activity timestamp, and injects `CurrentSession`.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let session_id = extract_session_id(&cookies).ok_or_else(|| {
        tracing::warn!("❌ No session_id cookie found");
        StatusCode::UNAUTHORIZED
    })?;

    let session = state
        .sessions
        .get_session(&session_id)
        .await
        .map_err(|e| {
            tracing::error!("❌ Session lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or_else(|| {
            tracing::warn!("❌ Session missing, revoked, or expired");
            StatusCode::UNAUTHORIZED
        })?;

    // Every authenticated request refreshes last_activity_at.
    let _ = state
        .sessions
        .update_session(&session_id, DeviceInfo::default())
        .await
        .map_err(|e| {
            tracing::error!("❌ Session activity bump failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    tracing::debug!("✅ User authenticated: {}", session.user_id);

    request.extensions_mut().insert(CurrentSession {
        user_id: session.user_id,
        session_id,
    });

    Ok(next.run(request).await)
}
