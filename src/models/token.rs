use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::envelope::EncryptedEnvelope;
use crate::models::session::DeviceInfo;

/// A long-lived refresh credential.
///
/// Both the plaintext lookup value and its encryption envelope are
/// persisted: the value gives O(1) lookup, the envelope proves the row was
/// not corrupted or swapped independently of its value column.
///
/// State machine: `Active -> (used | rotated+linked | revoked | expired)`.
/// `revoked_at` and `replaced_by_token_id` are terminal once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    /// The row's primary key.
    pub id: Uuid,
    /// The ID of the user this token belongs to.
    pub user_id: Uuid,
    /// The high-entropy plaintext lookup value.
    pub token_value: String,
    /// Envelope over `token_value`, for tamper verification.
    pub envelope: EncryptedEnvelope,
    /// The timestamp when the token was issued.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the token expires.
    pub expires_at: DateTime<Utc>,
    /// Set on logout, rotation, or incident revocation; never cleared.
    pub revoked_at: Option<DateTime<Utc>>,
    /// When rotation superseded this token, the replacement's id.
    pub replaced_by_token_id: Option<Uuid>,
    /// The timestamp of the last successful verification.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Device details captured at issuance.
    pub device_info: DeviceInfo,
    /// The client IP captured at issuance.
    pub ip_address: Option<String>,
}

impl RefreshToken {
    /// Whether the token is still usable: not revoked, not past expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }

    /// Whether the token's age has crossed the rotation threshold and a
    /// verification should transparently issue a replacement.
    pub fn needs_rotation(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        now - self.created_at > threshold
    }
}
