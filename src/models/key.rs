use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata for a stored symmetric encryption key.
///
/// Raw key material never appears here: it lives in the `encryption_keys`
/// table wrapped under the process master key, and only the key manager
/// unwraps it. At most `max_active_keys` rows are active at once; the most
/// recently created active, unexpired one is "current".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionKey {
    /// The key's identifier, referenced by envelopes as `key_id`.
    pub id: Uuid,
    /// The timestamp when the key was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp past which the key is rotated out.
    pub expires_at: DateTime<Utc>,
    /// Whether the key may still be selected as current.
    pub active: bool,
}

impl EncryptionKey {
    /// Whether this key is still usable as the current encryption key.
    pub fn is_current_candidate(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at > now
    }
}
