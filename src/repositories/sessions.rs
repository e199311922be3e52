use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::Result,
    models::session::{DeviceInfo, OAuthStateSession, UserSession},
};

fn row_to_session(row: &Row) -> Result<UserSession> {
    Ok(UserSession {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        created_at: row.try_get("created_at")?,
        last_activity_at: row.try_get("last_activity_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        device_info: DeviceInfo {
            user_agent: row.try_get("user_agent")?,
            platform: row.try_get("platform")?,
        },
        ip_address: row.try_get("ip_address")?,
    })
}

fn row_to_oauth_state(row: &Row) -> Result<OAuthStateSession> {
    Ok(OAuthStateSession {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        provider: row.try_get("provider")?,
        state: row.try_get("state")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
    })
}

/// Inserts a new user session row.
pub async fn insert_session(pool: &Pool, session: &UserSession) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO sessions
                (id, session_id, user_id, created_at, last_activity_at, expires_at,
                 user_agent, platform, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
            &[
                &session.id,
                &session.session_id,
                &session.user_id,
                &session.created_at,
                &session.last_activity_at,
                &session.expires_at,
                &session.device_info.user_agent,
                &session.device_info.platform,
                &session.ip_address,
            ],
        )
        .await?;
    Ok(())
}

/// Finds a live session by its opaque id. Expiry is enforced here, not left
/// to callers: revoked or expired rows come back as `None` even while still
/// physically present.
pub async fn find_live_session(pool: &Pool, session_id: &str) -> Result<Option<UserSession>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, session_id, user_id, created_at, last_activity_at, expires_at,
                   revoked_at, user_agent, platform, ip_address
            FROM sessions
            WHERE session_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
            "#,
            &[&session_id],
        )
        .await?;
    row.map(|r| row_to_session(&r)).transpose()
}

/// Merges device info into a live session and bumps `last_activity_at`.
pub async fn update_session(
    pool: &Pool,
    session_id: &str,
    device_info: &DeviceInfo,
) -> Result<Option<UserSession>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE sessions
            SET user_agent = COALESCE($2, user_agent),
                platform = COALESCE($3, platform),
                last_activity_at = NOW()
            WHERE session_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
            RETURNING id, session_id, user_id, created_at, last_activity_at, expires_at,
                      revoked_at, user_agent, platform, ip_address
            "#,
            &[&session_id, &device_info.user_agent, &device_info.platform],
        )
        .await?;
    row.map(|r| row_to_session(&r)).transpose()
}

/// Revokes a session. Returns the affected-row count so the service can
/// distinguish "already gone" from success.
pub async fn revoke_session(pool: &Pool, session_id: &str) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE sessions
            SET revoked_at = NOW()
            WHERE session_id = $1 AND revoked_at IS NULL
            "#,
            &[&session_id],
        )
        .await?;
    Ok(affected)
}

/// Revokes every live session of one user.
pub async fn revoke_all_sessions_for_user(pool: &Pool, user_id: &Uuid) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE sessions
            SET revoked_at = NOW()
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
            &[user_id],
        )
        .await?;
    Ok(affected)
}

/// Purges expired session rows. Maintenance only.
pub async fn delete_expired_sessions(pool: &Pool) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            DELETE FROM sessions
            WHERE expires_at <= NOW()
            "#,
            &[],
        )
        .await?;
    Ok(affected)
}

/// Inserts a new OAuth handshake-state row.
pub async fn insert_oauth_state(pool: &Pool, session: &OAuthStateSession) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO oauth_state_sessions
                (id, session_id, provider, state, metadata, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            &[
                &session.id,
                &session.session_id,
                &session.provider,
                &session.state,
                &session.metadata,
                &session.created_at,
                &session.expires_at,
            ],
        )
        .await?;
    Ok(())
}

/// Finds live handshake state by `(provider, state)`.
pub async fn find_live_oauth_state(
    pool: &Pool,
    provider: &str,
    state: &str,
) -> Result<Option<OAuthStateSession>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, session_id, provider, state, metadata, created_at, expires_at, revoked_at
            FROM oauth_state_sessions
            WHERE provider = $1 AND state = $2 AND revoked_at IS NULL AND expires_at > NOW()
            "#,
            &[&provider, &state],
        )
        .await?;
    row.map(|r| row_to_oauth_state(&r)).transpose()
}

/// Finds live handshake state by its opaque session id.
pub async fn find_live_oauth_state_by_session_id(
    pool: &Pool,
    session_id: &str,
) -> Result<Option<OAuthStateSession>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, session_id, provider, state, metadata, created_at, expires_at, revoked_at
            FROM oauth_state_sessions
            WHERE session_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
            "#,
            &[&session_id],
        )
        .await?;
    row.map(|r| row_to_oauth_state(&r)).transpose()
}

/// Atomically consumes handshake state: one conditional update claims the
/// row, so a replayed callback loses and gets nothing.
pub async fn consume_oauth_state(
    pool: &Pool,
    provider: &str,
    state: &str,
    now: DateTime<Utc>,
) -> Result<Option<OAuthStateSession>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            UPDATE oauth_state_sessions
            SET revoked_at = $3
            WHERE provider = $1 AND state = $2 AND revoked_at IS NULL AND expires_at > $3
            RETURNING id, session_id, provider, state, metadata, created_at, expires_at, revoked_at
            "#,
            &[&provider, &state, &now],
        )
        .await?;
    row.map(|r| row_to_oauth_state(&r)).transpose()
}

/// Revokes handshake state by its opaque session id.
pub async fn revoke_oauth_state(pool: &Pool, session_id: &str) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE oauth_state_sessions
            SET revoked_at = NOW()
            WHERE session_id = $1 AND revoked_at IS NULL
            "#,
            &[&session_id],
        )
        .await?;
    Ok(affected)
}

/// Purges expired handshake-state rows. Maintenance only.
pub async fn delete_expired_oauth_states(pool: &Pool) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            DELETE FROM oauth_state_sessions
            WHERE expires_at <= NOW()
            "#,
            &[],
        )
        .await?;
    Ok(affected)
}
