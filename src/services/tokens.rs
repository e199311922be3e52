use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, Utc};
use deadpool_postgres::Pool;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::config::Config;
use crate::crypto::envelope::EnvelopeService;
use crate::error::{AppError, Result};
use crate::models::session::DeviceInfo;
use crate::models::token::RefreshToken;
use crate::repositories::tokens as token_repo;

/// The entropy of a refresh token value in bytes.
const TOKEN_VALUE_SIZE: usize = 32;

/// The outcome of a successful refresh-token verification.
pub struct TokenVerification {
    /// The owner of the verified token.
    pub user_id: Uuid,
    /// When the token crossed the rotation threshold, the replacement that
    /// was transparently issued. The old token is already revoked and
    /// linked to this one.
    pub replacement: Option<RefreshToken>,
}

/// Issues, verifies, rotates, and revokes long-lived refresh credentials.
///
/// Owns the `refresh_tokens` table exclusively. Rotation is claimed with a
/// single conditional update so two racing verifications of the same aged
/// token can never both leave a live replacement behind.
#[derive(Clone)]
pub struct RefreshTokenEngine {
    pool: Pool,
    envelope: EnvelopeService,
    refresh_token_expiry: Duration,
    rotation_threshold: Duration,
    max_sessions_per_user: i64,
}

/// Generates a high-entropy random token value (URL-safe base64).
pub fn generate_token_value() -> String {
    let mut value = [0u8; TOKEN_VALUE_SIZE];
    OsRng.fill_bytes(&mut value);
    general_purpose::URL_SAFE_NO_PAD.encode(value)
}

impl RefreshTokenEngine {
    /// Creates a new `RefreshTokenEngine`.
    pub fn new(pool: Pool, envelope: EnvelopeService, config: &Config) -> Self {
        Self {
            pool,
            envelope,
            refresh_token_expiry: config.refresh_token_expiry,
            rotation_threshold: config.rotation_threshold,
            max_sessions_per_user: config.max_sessions_per_user,
        }
    }

    /// Issues a refresh token for a user, enforcing the per-user session
    /// quota. The quota check and the insert are a single conditional
    /// statement, so two concurrent creates for the same user cannot both
    /// slip under the limit; at the limit this fails with
    /// `SessionLimitExceeded` and storage is untouched.
    pub async fn create_refresh_token(
        &self,
        user_id: Uuid,
        device_info: Option<DeviceInfo>,
        ip_address: Option<String>,
    ) -> Result<RefreshToken> {
        let token = self.build_token(user_id, device_info, ip_address).await?;

        let inserted = token_repo::insert_token_within_quota(
            &self.pool,
            &token,
            self.max_sessions_per_user,
        )
        .await?;
        if inserted == 0 {
            return Err(AppError::SessionLimitExceeded(
                "Too many active sessions, log out elsewhere first".to_string(),
            ));
        }

        tracing::info!("✅ Refresh token {} issued for user {}", token.id, user_id);
        Ok(token)
    }

    /// Verifies a refresh token by its plaintext value.
    ///
    /// Returns `Ok(None)` for any missing, expired, revoked, corrupted, or
    /// tampered token: callers uniformly treat "no valid token" as an
    /// authentication failure, never a crash. Past the rotation threshold
    /// the token is transparently rotated and the replacement returned.
    pub async fn verify_refresh_token(&self, value: &str) -> Result<Option<TokenVerification>> {
        let Some(token) = token_repo::find_live_by_value(&self.pool, value).await? else {
            return Ok(None);
        };

        // The stored envelope must decrypt back to the looked-up value.
        // Catches a row whose plaintext column was swapped or corrupted
        // independently of its envelope.
        let decrypted = match self.envelope.decrypt(&token.envelope).await {
            Ok(plaintext) => plaintext,
            Err(AppError::Encryption(msg)) => {
                tracing::warn!("❌ Token {} failed envelope verification: {}", token.id, msg);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !bool::from(decrypted.as_bytes().ct_eq(value.as_bytes())) {
            tracing::warn!("❌ Token {} envelope does not match its lookup value", token.id);
            return Ok(None);
        }

        if token.needs_rotation(Utc::now(), self.rotation_threshold) {
            return self.rotate(token).await.map(Some);
        }

        token_repo::touch_last_used(&self.pool, &token.id).await?;
        Ok(Some(TokenVerification {
            user_id: token.user_id,
            replacement: None,
        }))
    }

    /// Rotates an aged token: create the replacement first, then atomically
    /// revoke-and-link the old row. The conditional update is the claim;
    /// the loser of a race revokes its freshly minted replacement again and
    /// verification proceeds without rotating.
    async fn rotate(&self, token: RefreshToken) -> Result<TokenVerification> {
        let replacement = self
            .mint_token(
                token.user_id,
                Some(token.device_info.clone()),
                token.ip_address.clone(),
            )
            .await?;

        let claimed = token_repo::claim_rotation(&self.pool, &token.id, &replacement.id).await?;
        if claimed == 0 {
            // Another request won the rotation between our read and our
            // claim. Undo the extra replacement; the winner's token is the
            // one that stays live.
            token_repo::revoke_by_id(&self.pool, &replacement.id).await?;
            tracing::debug!(
                "Rotation race on token {} lost; replacement {} withdrawn",
                token.id,
                replacement.id
            );
            return Ok(TokenVerification {
                user_id: token.user_id,
                replacement: None,
            });
        }

        tracing::info!(
            "🔄 Refresh token {} rotated to {} for user {}",
            token.id,
            replacement.id,
            token.user_id
        );
        Ok(TokenVerification {
            user_id: token.user_id,
            replacement: Some(replacement),
        })
    }

    /// Revokes a token by value; idempotent. Optionally links the
    /// replacement that superseded it.
    pub async fn revoke_refresh_token(
        &self,
        value: &str,
        replaced_by: Option<Uuid>,
    ) -> Result<()> {
        let affected = token_repo::revoke_by_value(&self.pool, value, replaced_by).await?;
        if affected == 0 {
            tracing::debug!("Revocation of an already-spent token ignored");
        }
        Ok(())
    }

    /// Revokes every live token of one user. Logout-everywhere and
    /// incident response.
    pub async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<u64> {
        let affected = token_repo::revoke_all_for_user(&self.pool, &user_id).await?;
        tracing::info!("🚫 Revoked {} refresh token(s) for user {}", affected, user_id);
        Ok(affected)
    }

    /// Purges expired or revoked rows. Maintenance only, never on the
    /// request path.
    pub async fn cleanup_tokens(&self) -> Result<u64> {
        let purged = token_repo::delete_spent(&self.pool).await?;
        if purged > 0 {
            tracing::info!("🧹 Purged {} spent refresh token(s)", purged);
        }
        Ok(purged)
    }

    /// Mints and persists a token row without the quota check. Rotation
    /// uses this directly: the replacement briefly coexists with the row it
    /// supersedes.
    async fn mint_token(
        &self,
        user_id: Uuid,
        device_info: Option<DeviceInfo>,
        ip_address: Option<String>,
    ) -> Result<RefreshToken> {
        let token = self.build_token(user_id, device_info, ip_address).await?;
        token_repo::insert_token(&self.pool, &token).await?;
        Ok(token)
    }

    /// Builds an unpersisted token: fresh value, sealed envelope, expiry.
    async fn build_token(
        &self,
        user_id: Uuid,
        device_info: Option<DeviceInfo>,
        ip_address: Option<String>,
    ) -> Result<RefreshToken> {
        let value = generate_token_value();
        let envelope = self.envelope.encrypt(&value).await?;
        let now = Utc::now();

        Ok(RefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_value: value,
            envelope,
            created_at: now,
            expires_at: now + self.refresh_token_expiry,
            revoked_at: None,
            replaced_by_token_id: None,
            last_used_at: None,
            device_info: device_info.unwrap_or_default(),
            ip_address,
        })
    }
}
