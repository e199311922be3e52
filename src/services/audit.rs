use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::audit::{AuditDraft, AuditEvent, AuditRecord};

/// Network context of the request an audit event describes.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Client IP already resolved by an upstream layer, when available.
    pub client_ip: Option<IpAddr>,
    /// Raw `x-forwarded-for` header value, possibly comma-separated.
    pub forwarded_for: Option<String>,
    /// The connection's peer socket address.
    pub peer_addr: Option<SocketAddr>,
    /// The client's user agent.
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Builds a context from the connection's peer address and the request
    /// headers.
    pub fn from_parts(peer_addr: Option<SocketAddr>, headers: &HeaderMap) -> Self {
        Self {
            client_ip: None,
            forwarded_for: headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string()),
            peer_addr,
            user_agent: headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string()),
        }
    }
}

/// Append-only, privacy-aware record of security-relevant events.
///
/// Raw user ids never appear in output: they are hashed with a salted
/// SHA-256 digest at emission. Free-form metadata is only ever attached
/// outside production, and a production event carrying metadata is a
/// validation failure rather than a silent strip.
#[derive(Clone)]
pub struct AuditLog {
    enabled: bool,
    include_metadata: bool,
    production: bool,
    hash_salt: String,
}

impl AuditLog {
    /// Creates a new `AuditLog` from configuration.
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.audit_logging_enabled,
            include_metadata: config.include_audit_metadata,
            production: config.production,
            hash_salt: config.audit_hash_salt.clone(),
        }
    }

    /// Resolves the client IP with the ordered fallback: upstream-resolved
    /// address, then the first `x-forwarded-for` entry, then the peer
    /// socket. In production an unresolvable IP is a hard error: a
    /// security trail must not carry a fabricated network origin. Outside
    /// production it falls back to loopback.
    pub fn resolve_client_ip(&self, ctx: &RequestContext) -> Result<IpAddr> {
        if let Some(ip) = ctx.client_ip {
            return Ok(ip);
        }

        if let Some(forwarded) = &ctx.forwarded_for {
            if let Some(first) = forwarded.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return Ok(ip);
                }
            }
        }

        if let Some(peer) = ctx.peer_addr {
            return Ok(peer.ip());
        }

        if self.production {
            return Err(AppError::Audit(
                "Client IP could not be resolved".to_string(),
            ));
        }
        Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    /// Combines request context and a caller-supplied draft into a full
    /// audit event.
    pub fn create_audit_event(
        &self,
        ctx: &RequestContext,
        draft: AuditDraft,
    ) -> Result<AuditEvent> {
        let ip = self.resolve_client_ip(ctx)?;
        Ok(AuditEvent {
            event_type: draft.event_type,
            user_id: draft.user_id,
            ip,
            user_agent: ctx.user_agent.clone(),
            status: draft.status,
            provider: draft.provider,
            error_code: draft.error_code,
            metadata: draft.metadata,
        })
    }

    /// Emits an audit event. No-ops entirely when auditing is disabled.
    /// Returns the emitted record, or `None` when nothing was written.
    pub fn log_auth_event(&self, event: AuditEvent) -> Result<Option<AuditRecord>> {
        if !self.enabled {
            return Ok(None);
        }

        if self.production && event.metadata.is_some() {
            return Err(AppError::Validation(
                "Audit metadata is not permitted in production".to_string(),
            ));
        }

        let metadata = if self.include_metadata && !self.production {
            event.metadata
        } else {
            None
        };

        let record = AuditRecord {
            event_type: event.event_type,
            user: event
                .user_id
                .map(|id| self.hash_user_id(&id))
                .unwrap_or_else(|| "anonymous".to_string()),
            ip: event.ip.to_string(),
            user_agent: event.user_agent,
            status: event.status,
            provider: event.provider,
            error_code: event.error_code,
            metadata,
        };

        let line = sonic_rs::to_string(&record)
            .map_err(|e| AppError::Internal(format!("Audit serialization failed: {}", e)))?;
        tracing::info!(target: "audit", "{}", line);

        Ok(Some(record))
    }

    /// Convenience wrapper: resolve, build, and emit in one call.
    pub fn record(&self, ctx: &RequestContext, draft: AuditDraft) -> Result<Option<AuditRecord>> {
        let event = self.create_audit_event(ctx, draft)?;
        self.log_auth_event(event)
    }

    /// Salted SHA-256 digest of a user id, hex-encoded.
    fn hash_user_id(&self, user_id: &Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.hash_salt.as_bytes());
        hasher.update(user_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::{AuditEventType, AuditStatus};

    fn audit(enabled: bool, include_metadata: bool, production: bool) -> AuditLog {
        AuditLog {
            enabled,
            include_metadata,
            production,
            hash_salt: "test-salt".to_string(),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext {
            client_ip: None,
            forwarded_for: None,
            peer_addr: Some("10.0.0.9:55000".parse().unwrap()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    #[test]
    fn ip_resolution_prefers_upstream_then_forwarded_then_peer() {
        let log = audit(true, false, false);

        let mut c = ctx();
        c.client_ip = Some("203.0.113.7".parse().unwrap());
        c.forwarded_for = Some("198.51.100.1, 10.0.0.1".to_string());
        assert_eq!(log.resolve_client_ip(&c).unwrap().to_string(), "203.0.113.7");

        c.client_ip = None;
        assert_eq!(log.resolve_client_ip(&c).unwrap().to_string(), "198.51.100.1");

        c.forwarded_for = None;
        assert_eq!(log.resolve_client_ip(&c).unwrap().to_string(), "10.0.0.9");
    }

    #[test]
    fn unresolvable_ip_is_loopback_in_dev_and_error_in_production() {
        let empty = RequestContext::default();

        let dev = audit(true, false, false);
        assert_eq!(dev.resolve_client_ip(&empty).unwrap().to_string(), "127.0.0.1");

        let prod = audit(true, false, true);
        assert!(matches!(
            prod.resolve_client_ip(&empty),
            Err(AppError::Audit(_))
        ));
    }

    #[test]
    fn disabled_audit_log_emits_nothing() {
        let log = audit(false, true, false);
        let event = log
            .create_audit_event(&ctx(), AuditDraft::success(AuditEventType::Login, Uuid::new_v4()))
            .unwrap();
        assert!(log.log_auth_event(event).unwrap().is_none());
    }

    #[test]
    fn user_ids_are_hashed_never_raw() {
        let log = audit(true, false, false);
        let user_id = Uuid::new_v4();
        let event = log
            .create_audit_event(&ctx(), AuditDraft::success(AuditEventType::Login, user_id))
            .unwrap();
        let record = log.log_auth_event(event).unwrap().unwrap();

        assert_ne!(record.user, user_id.to_string());
        assert!(!record.user.contains(&user_id.to_string()));
        assert_eq!(record.user.len(), 64);
        assert_eq!(record.status, AuditStatus::Success);
    }

    #[test]
    fn hashing_is_stable_per_salt() {
        let log = audit(true, false, false);
        let user_id = Uuid::new_v4();
        let a = log.hash_user_id(&user_id);
        let b = log.hash_user_id(&user_id);
        assert_eq!(a, b);

        let other = AuditLog {
            hash_salt: "other-salt".to_string(),
            ..audit(true, false, false)
        };
        assert_ne!(a, other.hash_user_id(&user_id));
    }

    #[test]
    fn anonymous_events_stay_anonymous() {
        let log = audit(true, false, false);
        let event = log
            .create_audit_event(&ctx(), AuditDraft::failure(AuditEventType::CsrfViolation, "CSRF_REJECTED"))
            .unwrap();
        let record = log.log_auth_event(event).unwrap().unwrap();
        assert_eq!(record.user, "anonymous");
        assert_eq!(record.error_code.as_deref(), Some("CSRF_REJECTED"));
    }

    #[test]
    fn production_event_with_metadata_is_rejected() {
        let log = audit(true, true, true);
        let mut c = ctx();
        c.client_ip = Some("203.0.113.7".parse().unwrap());
        let event = log
            .create_audit_event(
                &c,
                AuditDraft::success(AuditEventType::Login, Uuid::new_v4())
                    .with_metadata(r#"{"tab":"second"}"#.to_string()),
            )
            .unwrap();
        assert!(matches!(
            log.log_auth_event(event),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn metadata_is_gated_by_configuration() {
        let user_id = Uuid::new_v4();
        let draft = || {
            AuditDraft::success(AuditEventType::Login, user_id)
                .with_metadata(r#"{"k":"v"}"#.to_string())
        };

        let with = audit(true, true, false);
        let event = with.create_audit_event(&ctx(), draft()).unwrap();
        assert!(with.log_auth_event(event).unwrap().unwrap().metadata.is_some());

        let without = audit(true, false, false);
        let event = without.create_audit_event(&ctx(), draft()).unwrap();
        assert!(without.log_auth_event(event).unwrap().unwrap().metadata.is_none());
    }
}
