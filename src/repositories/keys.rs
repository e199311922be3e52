use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::key::EncryptionKey,
};

/// A stored key row: metadata plus the wrapped key material.
pub struct KeyRow {
    pub meta: EncryptionKey,
    /// Key material encrypted under the master key (`ciphertext || tag`).
    pub encrypted_keydata: Vec<u8>,
    /// Nonce the material was wrapped under.
    pub nonce: Vec<u8>,
}

fn row_to_key(row: &Row) -> Result<KeyRow> {
    Ok(KeyRow {
        meta: EncryptionKey {
            id: row.try_get("id")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            active: row.try_get("active")?,
        },
        encrypted_keydata: row.try_get("encrypted_keydata")?,
        nonce: row.try_get("nonce")?,
    })
}

/// Inserts a new wrapped key.
pub async fn insert_key(
    pool: &Pool,
    id: Uuid,
    encrypted_keydata: &[u8],
    nonce: &[u8],
    expires_at: DateTime<Utc>,
) -> Result<EncryptionKey> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO encryption_keys (id, encrypted_keydata, nonce, active, created_at, expires_at)
            VALUES ($1, $2, $3, true, NOW(), $4)
            RETURNING id, encrypted_keydata, nonce, active, created_at, expires_at
            "#,
            &[&id, &encrypted_keydata.to_vec(), &nonce.to_vec(), &expires_at],
        )
        .await?;
    Ok(row_to_key(&row)?.meta)
}

/// Finds the current key: the newest active, unexpired one.
pub async fn find_current(pool: &Pool) -> Result<Option<KeyRow>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, encrypted_keydata, nonce, active, created_at, expires_at
            FROM encryption_keys
            WHERE active = true AND expires_at > NOW()
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            &[],
        )
        .await?;
    row.map(|r| row_to_key(&r)).transpose()
}

/// Finds a key by id, active or not. Deactivated keys stay readable so
/// envelopes sealed under them remain decryptable until the key is purged.
pub async fn find_by_id(pool: &Pool, id: &Uuid) -> Result<Option<KeyRow>> {
    let client = pool.get().await?;
    let row = client
        .query_opt(
            r#"
            SELECT id, encrypted_keydata, nonce, active, created_at, expires_at
            FROM encryption_keys
            WHERE id = $1
            "#,
            &[id],
        )
        .await?;
    row.map(|r| row_to_key(&r)).transpose()
}

/// Deactivates every key past its expiry. Returns the number of rows hit.
pub async fn deactivate_expired(pool: &Pool) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE encryption_keys
            SET active = false
            WHERE active = true AND expires_at <= NOW()
            "#,
            &[],
        )
        .await?;
    Ok(affected)
}

/// Counts the active, unexpired keys.
pub async fn count_active(pool: &Pool) -> Result<i64> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            SELECT COUNT(*) AS live
            FROM encryption_keys
            WHERE active = true AND expires_at > NOW()
            "#,
            &[],
        )
        .await?;
    row.try_get("live").map_err(AppError::from)
}

/// Deactivates one key immediately.
pub async fn deactivate(pool: &Pool, id: &Uuid) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE encryption_keys
            SET active = false
            WHERE id = $1 AND active = true
            "#,
            &[id],
        )
        .await?;
    Ok(affected)
}

/// Deactivates every key. Incident-response path; the next
/// `get_active_key` call self-heals with a fresh key.
pub async fn deactivate_all(pool: &Pool) -> Result<u64> {
    let client = pool.get().await?;
    let affected = client
        .execute(
            r#"
            UPDATE encryption_keys
            SET active = false
            WHERE active = true
            "#,
            &[],
        )
        .await?;
    Ok(affected)
}
