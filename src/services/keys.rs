use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::Config;
use crate::crypto::aes;
use crate::error::{AppError, Result};
use crate::repositories::keys as key_repo;

/// Unwrapped key material held in the in-process cache.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
struct CachedKey {
    material: [u8; aes::KEY_SIZE],
}

/// An in-process cache of unwrapped encryption keys, keyed by id.
#[derive(Clone)]
pub struct KeyCache {
    cache: Arc<RwLock<HashMap<Uuid, CachedKey>>>,
}

impl KeyCache {
    /// Creates a new, empty `KeyCache`.
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gets key material from the cache by id.
    pub async fn get(&self, id: &Uuid) -> Option<Zeroizing<[u8; aes::KEY_SIZE]>> {
        let cache = self.cache.read().await;
        cache.get(id).map(|k| Zeroizing::new(k.material))
    }

    /// Inserts key material into the cache.
    pub async fn insert(&self, id: Uuid, material: [u8; aes::KEY_SIZE]) {
        let mut cache = self.cache.write().await;
        cache.insert(id, CachedKey { material });
    }

    /// Clears the cache.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.clear();
    }
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns symmetric encryption keys: creation, selection of the current key,
/// rotation, and revocation.
///
/// The only component that reads or writes raw key material. Material is
/// stored wrapped under the process master key and unwrapped through the
/// cache; nothing outside this module and the envelope service ever sees it.
#[derive(Clone)]
pub struct KeyManager {
    pool: Pool,
    master_key: Zeroizing<[u8; aes::KEY_SIZE]>,
    cache: KeyCache,
    max_active_keys: i64,
    key_expiration: Duration,
}

impl KeyManager {
    /// Creates a new `KeyManager`.
    pub fn new(pool: Pool, config: &Config) -> Result<Self> {
        let master_key: [u8; aes::KEY_SIZE] = config
            .master_key
            .as_slice()
            .try_into()
            .map_err(|_| AppError::Encryption("Invalid master key size".to_string()))?;

        Ok(Self {
            pool,
            master_key: Zeroizing::new(master_key),
            cache: KeyCache::new(),
            max_active_keys: config.max_active_keys,
            key_expiration: config.key_expiration,
        })
    }

    /// Generates a fresh 256-bit key, wraps it under the master key and
    /// persists it. Returns the new key's id.
    pub async fn create_key(&self) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let material = aes::generate_key();

        let (encrypted_keydata, nonce) = aes::encrypt(&self.master_key, material.as_bytes())?;
        let expires_at = Utc::now() + self.key_expiration;

        key_repo::insert_key(&self.pool, id, &encrypted_keydata, &nonce, expires_at).await?;
        self.cache.insert(id, *material.as_bytes()).await;

        tracing::info!("✅ Encryption key {} created (expires {})", id, expires_at);
        Ok(id)
    }

    /// Returns the current key: the newest active, unexpired one. Creates a
    /// key when none exists, so the system is never left without one.
    pub async fn get_active_key(&self) -> Result<(Uuid, Zeroizing<[u8; aes::KEY_SIZE]>)> {
        match key_repo::find_current(&self.pool).await? {
            Some(row) => {
                let material = self.unwrap_material(&row).await?;
                Ok((row.meta.id, material))
            }
            None => {
                tracing::warn!("⚠️  No active encryption key found, creating one...");
                let id = self.create_key().await?;
                let material = self
                    .cache
                    .get(&id)
                    .await
                    .ok_or_else(|| AppError::Encryption("Key cache miss after create".to_string()))?;
                Ok((id, material))
            }
        }
    }

    /// Returns the material of a key by id, active or deactivated. Errors
    /// (fail closed) when the key is unknown; we never conjure material for
    /// an id that cannot decrypt anything.
    pub async fn get_key_by_id(&self, id: Uuid) -> Result<Zeroizing<[u8; aes::KEY_SIZE]>> {
        if let Some(material) = self.cache.get(&id).await {
            return Ok(material);
        }

        let row = key_repo::find_by_id(&self.pool, &id)
            .await?
            .ok_or_else(|| AppError::Encryption(format!("Unknown encryption key: {}", id)))?;

        self.unwrap_material(&row).await
    }

    /// Deactivates expired keys; if fewer than `max_active_keys` remain
    /// active, creates a replacement. Runs on a schedule, never on the
    /// request path.
    pub async fn rotate_keys(&self) -> Result<()> {
        let deactivated = key_repo::deactivate_expired(&self.pool).await?;
        if deactivated > 0 {
            tracing::info!("🔄 Key rotation deactivated {} expired key(s)", deactivated);
        }

        let active = key_repo::count_active(&self.pool).await?;
        if active < self.max_active_keys {
            let id = self.create_key().await?;
            tracing::info!("🔄 Key rotation created replacement key {}", id);
        }

        Ok(())
    }

    /// Immediately deactivates one key. Ciphertext already sealed under it
    /// stays decryptable until the key row is purged.
    pub async fn revoke_key(&self, id: Uuid) -> Result<()> {
        let affected = key_repo::deactivate(&self.pool, &id).await?;
        if affected == 0 {
            return Err(AppError::NotFound);
        }
        tracing::warn!("🚫 Encryption key {} revoked", id);
        Ok(())
    }

    /// Incident response: deactivates every key. The next `get_active_key`
    /// call self-heals with a fresh one.
    pub async fn revoke_all_keys(&self) -> Result<u64> {
        let affected = key_repo::deactivate_all(&self.pool).await?;
        self.cache.clear().await;
        tracing::warn!("🚫 All encryption keys revoked ({} deactivated)", affected);
        Ok(affected)
    }

    /// Unwraps a row's key material through the cache.
    async fn unwrap_material(
        &self,
        row: &key_repo::KeyRow,
    ) -> Result<Zeroizing<[u8; aes::KEY_SIZE]>> {
        if let Some(material) = self.cache.get(&row.meta.id).await {
            return Ok(material);
        }

        let nonce: [u8; aes::NONCE_SIZE] = row
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| AppError::Encryption("Invalid key nonce size".to_string()))?;

        let plaintext = aes::decrypt(&self.master_key, &row.encrypted_keydata, &nonce)?;
        let material: [u8; aes::KEY_SIZE] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| AppError::Encryption("Invalid key material size".to_string()))?;

        self.cache.insert(row.meta.id, material).await;
        tracing::debug!("Key {} unwrapped and cached", row.meta.id);
        Ok(Zeroizing::new(material))
    }
}
