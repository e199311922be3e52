use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
///
/// Cryptographic and store errors are caught at each component boundary and
/// re-thrown as one of these variants. Each variant carries a stable code
/// string so HTTP handlers can map consistently without knowing the cause.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database pool error.
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An authentication error. Covers missing, expired, and revoked
    /// credentials alike so callers cannot enumerate which it was.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// Too many live sessions/refresh tokens for one user.
    #[error("Session limit exceeded: {0}")]
    SessionLimitExceeded(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An encryption error. Integrity-tag mismatches land here and fail
    /// closed: no plaintext, no partial decryption.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// A CSRF double-submit rejection.
    #[error("CSRF rejected: {0}")]
    CsrfRejected(String),

    /// An audit pipeline error (e.g. unresolvable client IP in production).
    #[error("Audit error: {0}")]
    Audit(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Pool(_) | AppError::Database(_) => "STORAGE_ERROR",
            AppError::Redis(_) => "CACHE_ERROR",
            AppError::Authentication(_) => "UNAUTHENTICATED",
            AppError::Unauthorized => "FORBIDDEN",
            AppError::NotFound => "NOT_FOUND",
            AppError::SessionLimitExceeded(_) => "SESSION_LIMIT_EXCEEDED",
            AppError::Validation(_) => "VALIDATION_FAILED",
            AppError::Encryption(_) => "ENCRYPTION_ERROR",
            AppError::CsrfRejected(_) => "CSRF_REJECTED",
            AppError::Audit(_) => "AUDIT_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            AppError::Pool(ref e) => {
                tracing::error!("Database pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                // Generic body: expired, revoked and unknown credentials
                // must be indistinguishable to the caller.
                (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::SessionLimitExceeded(ref msg) => {
                tracing::warn!("Session limit exceeded: {}", msg);
                (StatusCode::CONFLICT, msg.clone())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Encryption(ref msg) => {
                tracing::error!("Encryption error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::CsrfRejected(ref msg) => {
                tracing::warn!("CSRF rejected: {}", msg);
                (StatusCode::FORBIDDEN, msg.clone())
            }

            AppError::Audit(ref msg) => {
                tracing::error!("Audit error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message,
            "code": code,
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error","code":"INTERNAL_ERROR"}"#.to_string());

        (status, body).into_response()
    }
}
