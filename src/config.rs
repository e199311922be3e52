use anyhow::{Context, Result};
use chrono::Duration;
use std::env;
use zeroize::{Zeroize, Zeroizing};

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The URL of the Redis server.
    pub redis_url: String,
    /// The master key used to wrap stored encryption keys.
    pub master_key: Zeroizing<Vec<u8>>,
    /// Maximum number of simultaneously active encryption keys.
    pub max_active_keys: i64,
    /// Lifetime of a newly created encryption key.
    pub key_expiration: Duration,
    /// Interval between key-rotation sweeps.
    pub rotation_interval: Duration,
    /// Lifetime of a refresh token.
    pub refresh_token_expiry: Duration,
    /// Token age past which `verify` transparently rotates it.
    pub rotation_threshold: Duration,
    /// Maximum number of simultaneously live refresh tokens per user.
    pub max_sessions_per_user: i64,
    /// Lifetime of an authenticated-user session.
    pub session_ttl: Duration,
    /// Lifetime of an OAuth handshake-state session.
    pub oauth_state_ttl: Duration,
    /// Whether the audit pipeline emits anything at all.
    pub audit_logging_enabled: bool,
    /// Whether audit events may carry free-form metadata (ignored in
    /// production, where metadata is always rejected).
    pub include_audit_metadata: bool,
    /// Salt mixed into audited user-id hashes.
    pub audit_hash_salt: String,
    /// Whether we are running in production.
    pub production: bool,
}

/// Fixed audit salt used outside production so hashed ids stay greppable
/// across restarts during development.
const DEV_AUDIT_HASH_SALT: &str = "authcore-dev-audit-salt";

fn env_i64(name: &str, default: i64) -> Result<i64> {
    match env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("Invalid {name}")),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let production = env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            == "production";

        let mut master_key_hex = env::var("MASTER_KEY")
            .context("MASTER_KEY must be set (generate with: openssl rand -hex 32)")?;

        let master_key_bytes =
            hex::decode(&master_key_hex).context("MASTER_KEY must be valid hexadecimal")?;

        master_key_hex.zeroize();

        if master_key_bytes.len() != 32 {
            anyhow::bail!("MASTER_KEY must be exactly 32 bytes (64 hex characters)");
        }

        let audit_hash_salt = match env::var("AUDIT_HASH_SALT") {
            Ok(salt) => salt,
            Err(_) if production => {
                anyhow::bail!("AUDIT_HASH_SALT must be set in production")
            }
            Err(_) => DEV_AUDIT_HASH_SALT.to_string(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            master_key: Zeroizing::new(master_key_bytes),
            max_active_keys: env_i64("MAX_ACTIVE_KEYS", 3)?,
            key_expiration: Duration::days(env_i64("KEY_EXPIRATION_DAYS", 90)?),
            rotation_interval: Duration::days(env_i64("KEY_ROTATION_INTERVAL_DAYS", 30)?),
            refresh_token_expiry: Duration::days(env_i64("REFRESH_TOKEN_EXPIRY_DAYS", 7)?),
            rotation_threshold: Duration::hours(env_i64("ROTATION_THRESHOLD_HOURS", 24)?),
            max_sessions_per_user: env_i64("MAX_SESSIONS_PER_USER", 3)?,
            session_ttl: Duration::hours(env_i64("SESSION_TTL_HOURS", 24)?),
            oauth_state_ttl: Duration::minutes(env_i64("OAUTH_STATE_TTL_MINUTES", 10)?),
            audit_logging_enabled: env_bool("AUDIT_LOGGING_ENABLED", true),
            include_audit_metadata: env_bool("INCLUDE_AUDIT_METADATA", false),
            audit_hash_salt,
            production,
        })
    }
}
