use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    crypto::{aes, envelope::EncryptedEnvelope},
    error::{AppError, Result},
    models::{session::DeviceInfo, token::RefreshToken},
};

const TOKEN_COLUMNS: &str = "id, user_id, token_value, ciphertext, iv, auth_tag, key_id, salt, \
     created_at, expires_at, revoked_at, replaced_by_token_id, last_used_at, \
     user_agent, platform, ip_address";

/// A helper function to map a `tokio_postgres::Row` to a `RefreshToken`.
fn row_to_token(row: &Row) -> Result<RefreshToken> {
    let iv_vec: Vec<u8> = row.try_get("iv")?;
    let iv: [u8; aes::NONCE_SIZE] = iv_vec
        .try_into()
        .map_err(|_| AppError::Encryption("Invalid stored IV size".to_string()))?;

    let tag_vec: Vec<u8> = row.try_get("auth_tag")?;
    let auth_tag: [u8; aes::TAG_SIZE] = tag_vec
        .try_into()
        .map_err(|_| AppError::Encryption("Invalid stored auth tag size".to_string()))?;

    Ok(RefreshToken {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        token_value: row.try_get("token_value")?,
        envelope: EncryptedEnvelope {
            ciphertext: row.try_get("ciphertext")?,
            iv,
            auth_tag,
            key_id: row.try_get("key_id")?,
            salt: row.try_get("salt")?,
        },
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        replaced_by_token_id: row.try_get("replaced_by_token_id")?,
        last_used_at: row.try_get("last_used_at")?,
        device_info: DeviceInfo {
            user_agent: row.try_get("user_agent")?,
            platform: row.try_get("platform")?,
        },
        ip_address: row.try_get("ip_address")?,
    })
}

/// Inserts a new refresh token row.
pub async fn insert_token(pool: &Pool, token: &RefreshToken) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO refresh_tokens
                (id, user_id, token_value, ciphertext, iv, auth_tag, key_id, salt,
                 created_at, expires_at, user_agent, platform, ip_address)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
            &[
                &token.id,
                &token.user_id,
                &token.token_value,
                &token.envelope.ciphertext,
                &token.envelope.iv.to_vec(),
                &token.envelope.auth_tag.to_vec(),
                &token.envelope.key_id,
                &token.envelope.salt,
                &token.created_at,
                &token.expires_at,
                &token.device_info.user_agent,
                &token.device_info.platform,
                &token.ip_address,
            ],
        )
        .await?;
    Ok(())
}

/// Inserts a refresh token row only while the user holds fewer than
/// `max_live` live tokens. The quota check and the insert are one
/// statement, so two concurrent creates cannot both slip under the limit
/// through separate count-then-insert calls. Returns the affected-row
/// count; 0 means the quota rejected the insert and nothing was written.
pub async fn insert_token_within_quota(
    pool: &Pool,
    token: &RefreshToken,
    max_live: i64,
) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            INSERT INTO refresh_tokens
                (id, user_id, token_value, ciphertext, iv, auth_tag, key_id, salt,
                 created_at, expires_at, user_agent, platform, ip_address)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13
            WHERE (
                SELECT COUNT(*)
                FROM refresh_tokens
                WHERE user_id = $2 AND revoked_at IS NULL AND expires_at > NOW()
            ) < $14
            "#,
            &[
                &token.id,
                &token.user_id,
                &token.token_value,
                &token.envelope.ciphertext,
                &token.envelope.iv.to_vec(),
                &token.envelope.auth_tag.to_vec(),
                &token.envelope.key_id,
                &token.envelope.salt,
                &token.created_at,
                &token.expires_at,
                &token.device_info.user_agent,
                &token.device_info.platform,
                &token.ip_address,
                &max_live,
            ],
        )
        .await?;
    Ok(affected)
}

/// Looks a token up by its plaintext value among live rows only.
pub async fn find_live_by_value(pool: &Pool, value: &str) -> Result<Option<RefreshToken>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            format!(
                r#"
                SELECT {TOKEN_COLUMNS}
                FROM refresh_tokens
                WHERE token_value = $1 AND revoked_at IS NULL AND expires_at > NOW()
                "#
            )
            .as_str(),
            &[&value],
        )
        .await?;
    row.map(|r| row_to_token(&r)).transpose()
}

/// Finds a token by id regardless of state. Maintenance/introspection only.
pub async fn find_by_id(pool: &Pool, id: &Uuid) -> Result<Option<RefreshToken>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            format!(
                r#"
                SELECT {TOKEN_COLUMNS}
                FROM refresh_tokens
                WHERE id = $1
                "#
            )
            .as_str(),
            &[id],
        )
        .await?;
    row.map(|r| row_to_token(&r)).transpose()
}

/// Counts a user's live (non-revoked, unexpired) tokens.
pub async fn count_live_for_user(pool: &Pool, user_id: &Uuid) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            SELECT COUNT(*) AS live
            FROM refresh_tokens
            WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
            "#,
            &[user_id],
        )
        .await?;
    row.try_get("live").map_err(AppError::from)
}

/// Atomically claims the rotation of `old_id`: revokes it and links it to
/// its replacement in one conditional update. Exactly one of two racing
/// callers sees an affected-row count of 1.
pub async fn claim_rotation(pool: &Pool, old_id: &Uuid, new_id: &Uuid) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), replaced_by_token_id = $2
            WHERE id = $1 AND revoked_at IS NULL
            "#,
            &[old_id, new_id],
        )
        .await?;
    Ok(affected)
}

/// Stamps a token's `last_used_at`.
pub async fn touch_last_used(pool: &Pool, id: &Uuid) -> Result<()> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            UPDATE refresh_tokens
            SET last_used_at = NOW()
            WHERE id = $1
            "#,
            &[id],
        )
        .await?;
    Ok(())
}

/// Revokes a token by value; idempotent (an already-revoked row is left
/// untouched). Returns the affected-row count.
pub async fn revoke_by_value(
    pool: &Pool,
    value: &str,
    replaced_by: Option<Uuid>,
) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), replaced_by_token_id = COALESCE($2, replaced_by_token_id)
            WHERE token_value = $1 AND revoked_at IS NULL
            "#,
            &[&value, &replaced_by],
        )
        .await?;
    Ok(affected)
}

/// Revokes a token by id. Used to compensate a lost rotation race.
pub async fn revoke_by_id(pool: &Pool, id: &Uuid) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE id = $1 AND revoked_at IS NULL
            "#,
            &[id],
        )
        .await?;
    Ok(affected)
}

/// Revokes every live token of one user. Logout-everywhere.
pub async fn revoke_all_for_user(pool: &Pool, user_id: &Uuid) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE user_id = $1 AND revoked_at IS NULL
            "#,
            &[user_id],
        )
        .await?;
    Ok(affected)
}

/// Purges expired or revoked rows. Maintenance only.
pub async fn delete_spent(pool: &Pool) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at <= NOW() OR revoked_at IS NOT NULL
            "#,
            &[],
        )
        .await?;
    Ok(affected)
}
