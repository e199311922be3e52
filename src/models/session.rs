use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client device details attached to sessions and refresh tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceInfo {
    /// The client's user agent string.
    pub user_agent: Option<String>,
    /// The client's platform (e.g. "web", "ios").
    pub platform: Option<String>,
}

impl DeviceInfo {
    /// Merges another partial `DeviceInfo` into this one. Fields present in
    /// `other` win; absent fields keep their current value.
    pub fn merge(&mut self, other: DeviceInfo) {
        if other.user_agent.is_some() {
            self.user_agent = other.user_agent;
        }
        if other.platform.is_some() {
            self.platform = other.platform;
        }
    }
}

/// Discriminant for the two session record kinds the store manages.
///
/// The two kinds live in separate tables but flow through shared code paths
/// (revocation auditing, sweeps); this tag is validated at the store
/// boundary instead of inferring the kind from field presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// An authenticated-user session.
    User,
    /// A short-lived OAuth handshake-state session.
    OAuthState,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::User => "user",
            SessionKind::OAuthState => "oauth_state",
        }
    }
}

/// An authenticated-user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSession {
    /// The row's primary key.
    pub id: Uuid,
    /// The opaque, unguessable identifier handed to the client.
    pub session_id: String,
    /// The ID of the user this session belongs to.
    pub user_id: Uuid,
    /// The timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// Bumped on every authenticated request.
    pub last_activity_at: DateTime<Utc>,
    /// The timestamp when the session expires.
    pub expires_at: DateTime<Utc>,
    /// Set when the session is revoked; never cleared.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Device details captured at creation, merged on updates.
    pub device_info: DeviceInfo,
    /// The client IP captured at creation.
    pub ip_address: Option<String>,
}

impl UserSession {
    /// Whether the session is still usable: not revoked, not past expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// A short-lived OAuth handshake-state session.
///
/// Created when an OAuth flow starts and consumed exactly once by the
/// matching callback; the short TTL bounds the replay window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthStateSession {
    /// The row's primary key.
    pub id: Uuid,
    /// The opaque, unguessable identifier handed to the client.
    pub session_id: String,
    /// The OAuth provider this handshake targets.
    pub provider: String,
    /// The nonce matched against the provider's callback.
    pub state: String,
    /// Caller-supplied handshake context, serialized as JSON.
    pub metadata: Option<String>,
    /// The timestamp when the handshake started.
    pub created_at: DateTime<Utc>,
    /// The timestamp when the handshake state expires.
    pub expires_at: DateTime<Utc>,
    /// Set when consumed by the callback (single use) or revoked.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl OAuthStateSession {
    /// Whether the handshake state can still be consumed.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}
