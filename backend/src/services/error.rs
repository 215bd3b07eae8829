//! Service-level error taxonomy.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::oracle::TargetError;

/// Why authentication failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Unknown username or wrong password. Callers never learn which.
    InvalidCredentials,
    InactiveAccount,
    /// Malformed token, bad signature, wrong algorithm or issuer.
    InvalidToken,
    ExpiredToken,
    /// A guarded operation was reached without validated claims.
    AuthenticationRequired,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthFailure::InactiveAccount => "INACTIVE_ACCOUNT",
            AuthFailure::InvalidToken => "INVALID_TOKEN",
            AuthFailure::ExpiredToken => "EXPIRED_TOKEN",
            AuthFailure::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
        }
    }
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            AuthFailure::InvalidCredentials => "invalid username or password",
            AuthFailure::InactiveAccount => "account is inactive",
            AuthFailure::InvalidToken => "invalid token",
            AuthFailure::ExpiredToken => "token has expired",
            AuthFailure::AuthenticationRequired => "authentication required",
        };
        f.write_str(message)
    }
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("missing permission {permission}")]
    Authorization { permission: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    TargetSystem(#[from] TargetError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Stable machine-readable code for the API error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Authentication(failure) => failure.code(),
            ServiceError::Authorization { .. } => "PERMISSION_DENIED",
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::TargetSystem(TargetError::Timeout(_)) => "TARGET_TIMEOUT",
            ServiceError::TargetSystem(TargetError::Cancelled) => "CANCELLED",
            ServiceError::TargetSystem(_) => "TARGET_UNAVAILABLE",
            ServiceError::Persistence(_) => "PERSISTENCE_ERROR",
            ServiceError::Configuration(_) => "CONFIGURATION_ERROR",
            ServiceError::NotFound(_) => "NOT_FOUND",
        }
    }
}

impl From<AuthFailure> for ServiceError {
    fn from(failure: AuthFailure) -> Self {
        ServiceError::Authentication(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_distinguish_kinds() {
        assert_eq!(
            ServiceError::from(AuthFailure::ExpiredToken).code(),
            "EXPIRED_TOKEN"
        );
        assert_eq!(
            ServiceError::Authorization { permission: "VIEW_SQL".into() }.code(),
            "PERMISSION_DENIED"
        );
        assert_eq!(
            ServiceError::from(TargetError::Unavailable("down".into())).code(),
            "TARGET_UNAVAILABLE"
        );
        assert_eq!(
            ServiceError::from(DatabaseError::NotFound("x".into())).code(),
            "PERSISTENCE_ERROR"
        );
    }

    #[test]
    fn test_credential_failure_message_is_generic() {
        let message = ServiceError::from(AuthFailure::InvalidCredentials).to_string();
        assert!(message.contains("invalid username or password"));
    }
}
