use deadpool_postgres::Pool;
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::crypto::envelope::EnvelopeService;
use crate::error::Result;
use crate::services::audit::AuditLog;
use crate::services::keys::KeyManager;
use crate::services::sessions::SessionStore;
use crate::services::tokens::RefreshTokenEngine;

/// The application's state: every core service constructed once at startup
/// and passed by injection, no hidden globals.
#[derive(Clone)]
pub struct AppState {
    /// The database connection pool.
    pub db: Pool,
    /// The Redis connection manager (CSRF token registry).
    pub redis: ConnectionManager,
    /// The application's configuration.
    pub config: Config,
    /// The encryption-key manager.
    pub keys: KeyManager,
    /// The envelope encryption service.
    pub envelope: EnvelopeService,
    /// The refresh token engine.
    pub tokens: RefreshTokenEngine,
    /// The session store (user + OAuth handshake-state sessions).
    pub sessions: SessionStore,
    /// The audit log.
    pub audit: AuditLog,
}

impl AppState {
    /// Creates a new `AppState`.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL pool initialized with deadpool-postgres");

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis connection manager initialized (pooled)");

        let keys = KeyManager::new(db.clone(), config)?;
        let envelope = EnvelopeService::new(keys.clone());
        let tokens = RefreshTokenEngine::new(db.clone(), envelope.clone(), config);
        let sessions = SessionStore::new(db.clone(), config);
        let audit = AuditLog::new(config);
        tracing::info!("✅ Core services constructed");

        Ok(AppState {
            db,
            redis,
            config: config.clone(),
            keys,
            envelope,
            tokens,
            sessions,
            audit,
        })
    }
}
