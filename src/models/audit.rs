use serde::Serialize;
use std::net::IpAddr;
use uuid::Uuid;

/// The kinds of security-relevant events the audit pipeline records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Login,
    Logout,
    LogoutAll,
    TokenRefresh,
    TokenRotated,
    TokenRevoked,
    OauthStart,
    OauthCallback,
    CsrfViolation,
}

/// Whether the audited operation succeeded or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
}

/// The caller-supplied part of an audit event, before request context is
/// resolved into it.
#[derive(Debug, Clone)]
pub struct AuditDraft {
    pub event_type: AuditEventType,
    pub user_id: Option<Uuid>,
    pub status: AuditStatus,
    pub provider: Option<String>,
    pub error_code: Option<String>,
    pub metadata: Option<String>,
}

impl AuditDraft {
    /// A successful event for a known user.
    pub fn success(event_type: AuditEventType, user_id: Uuid) -> Self {
        Self {
            event_type,
            user_id: Some(user_id),
            status: AuditStatus::Success,
            provider: None,
            error_code: None,
            metadata: None,
        }
    }

    /// A successful event with no associated user (e.g. handshake state).
    pub fn anonymous_success(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            user_id: None,
            status: AuditStatus::Success,
            provider: None,
            error_code: None,
            metadata: None,
        }
    }

    /// A failed event, anonymous by default.
    pub fn failure(event_type: AuditEventType, error_code: &str) -> Self {
        Self {
            event_type,
            user_id: None,
            status: AuditStatus::Failure,
            provider: None,
            error_code: Some(error_code.to_string()),
            metadata: None,
        }
    }

    pub fn with_provider(mut self, provider: &str) -> Self {
        self.provider = Some(provider.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: String) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A fully resolved audit event. Still carries the raw user id; hashing
/// happens at emission so raw identifiers never leave the process.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub user_id: Option<Uuid>,
    pub ip: IpAddr,
    pub user_agent: Option<String>,
    pub status: AuditStatus,
    pub provider: Option<String>,
    pub error_code: Option<String>,
    pub metadata: Option<String>,
}

/// The wire form actually emitted: user id replaced by a salted hash (or
/// `"anonymous"`), metadata already gated by configuration.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub user: String,
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub status: AuditStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}
