use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::session::{DeviceInfo, OAuthStateSession, UserSession};
use crate::repositories::sessions as session_repo;

/// The entropy of an opaque session id in bytes.
const SESSION_ID_SIZE: usize = 32;

/// Generates an opaque, unguessable session identifier.
pub fn generate_session_id() -> String {
    let mut id = [0u8; SESSION_ID_SIZE];
    OsRng.fill_bytes(&mut id);
    general_purpose::URL_SAFE_NO_PAD.encode(id)
}

/// Short-term identity anchors: authenticated-user sessions and OAuth
/// handshake-state sessions, each in its own table with its own TTL.
///
/// Getters enforce expiry themselves; a row past `expires_at` is reported
/// absent even while physically present, and the next sweep removes it.
#[derive(Clone)]
pub struct SessionStore {
    pool: Pool,
    session_ttl: Duration,
    oauth_state_ttl: Duration,
}

impl SessionStore {
    /// Creates a new `SessionStore`.
    pub fn new(pool: Pool, config: &Config) -> Self {
        Self {
            pool,
            session_ttl: config.session_ttl,
            oauth_state_ttl: config.oauth_state_ttl,
        }
    }

    /// Creates an authenticated-user session with the configured TTL.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        device_info: Option<DeviceInfo>,
        ip_address: Option<String>,
    ) -> Result<UserSession> {
        let now = Utc::now();
        let session = UserSession {
            id: Uuid::new_v4(),
            session_id: generate_session_id(),
            user_id,
            created_at: now,
            last_activity_at: now,
            expires_at: now + self.session_ttl,
            revoked_at: None,
            device_info: device_info.unwrap_or_default(),
            ip_address,
        };

        session_repo::insert_session(&self.pool, &session).await?;
        tracing::info!("✅ Session created for user {}", user_id);
        Ok(session)
    }

    /// Returns a live session, or `None` for missing, revoked, or expired.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<UserSession>> {
        session_repo::find_live_session(&self.pool, session_id).await
    }

    /// Merges device info into a live session and refreshes its
    /// `last_activity_at`. Returns `None` when the session is gone.
    pub async fn update_session(
        &self,
        session_id: &str,
        device_info: DeviceInfo,
    ) -> Result<Option<UserSession>> {
        session_repo::update_session(&self.pool, session_id, &device_info).await
    }

    /// Revokes a session. Fails loudly with `NotFound` when no live row
    /// matches, so callers can distinguish "already gone" from success.
    pub async fn revoke_session(&self, session_id: &str) -> Result<()> {
        let affected = session_repo::revoke_session(&self.pool, session_id).await?;
        if affected == 0 {
            return Err(AppError::NotFound);
        }
        tracing::info!("🚫 Session revoked");
        Ok(())
    }

    /// Revokes every live session of one user.
    pub async fn revoke_all_user_sessions(&self, user_id: Uuid) -> Result<u64> {
        let affected = session_repo::revoke_all_sessions_for_user(&self.pool, &user_id).await?;
        tracing::info!("🚫 Revoked {} session(s) for user {}", affected, user_id);
        Ok(affected)
    }

    /// Starts an OAuth handshake: stores the state nonce with its short TTL.
    pub async fn create_oauth_state_session(
        &self,
        provider: String,
        state: String,
        metadata: Option<String>,
    ) -> Result<OAuthStateSession> {
        let now = Utc::now();
        let session = OAuthStateSession {
            id: Uuid::new_v4(),
            session_id: generate_session_id(),
            provider,
            state,
            metadata,
            created_at: now,
            expires_at: now + self.oauth_state_ttl,
            revoked_at: None,
        };

        session_repo::insert_oauth_state(&self.pool, &session).await?;
        tracing::info!("✅ OAuth handshake state stored for {}", session.provider);
        Ok(session)
    }

    /// Returns live handshake state by `(provider, state)`, or `None`.
    pub async fn get_oauth_state_session(
        &self,
        provider: &str,
        state: &str,
    ) -> Result<Option<OAuthStateSession>> {
        session_repo::find_live_oauth_state(&self.pool, provider, state).await
    }

    /// Returns live handshake state by opaque session id, or `None`.
    pub async fn get_oauth_state_session_by_session_id(
        &self,
        session_id: &str,
    ) -> Result<Option<OAuthStateSession>> {
        session_repo::find_live_oauth_state_by_session_id(&self.pool, session_id).await
    }

    /// Consumes handshake state exactly once: the claim is a single
    /// conditional update, so a replayed callback comes back empty-handed.
    pub async fn consume_oauth_state_session(
        &self,
        provider: &str,
        state: &str,
    ) -> Result<Option<OAuthStateSession>> {
        session_repo::consume_oauth_state(&self.pool, provider, state, Utc::now()).await
    }

    /// Revokes handshake state by opaque session id; `NotFound` when no
    /// live row matches.
    pub async fn revoke_oauth_state_session(&self, session_id: &str) -> Result<()> {
        let affected = session_repo::revoke_oauth_state(&self.pool, session_id).await?;
        if affected == 0 {
            return Err(AppError::NotFound);
        }
        tracing::info!("🚫 OAuth handshake state revoked");
        Ok(())
    }

    /// Purges expired user sessions. Maintenance only.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let purged = session_repo::delete_expired_sessions(&self.pool).await?;
        if purged > 0 {
            tracing::info!("🧹 Purged {} expired session(s)", purged);
        }
        Ok(purged)
    }

    /// Purges expired OAuth handshake state. Maintenance only.
    pub async fn cleanup_expired_oauth_sessions(&self) -> Result<u64> {
        let purged = session_repo::delete_expired_oauth_states(&self.pool).await?;
        if purged > 0 {
            tracing::info!("🧹 Purged {} expired OAuth handshake state row(s)", purged);
        }
        Ok(purged)
    }
}
