//! # Token Service
//!
//! Issues and validates signed bearer tokens (HS256 JWTs).
//!
//! Claims are self-contained: role names and the permission closure are
//! frozen into the token at issuance, so validation needs no store
//! lookup. A role change reaches a caller on their next login; an issued
//! token keeps its permissions until it expires.
//!
//! ## Claims
//!
//! | Claim | Meaning |
//! |-------|---------|
//! | `sub` | identity id |
//! | `username` | login name |
//! | `roles` | role names at issuance |
//! | `permissions` | permission codes at issuance |
//! | `iat` / `exp` | unix seconds, `exp > iat` |
//! | `iss` | configured issuer |

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{MAX_TOKEN_TTL_SECS, MIN_SECRET_LEN};
use crate::services::error::{AuthFailure, ServiceError};

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token service misconfigured: {0}")]
    Configuration(String),

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token expired")]
    Expired,
}

impl From<TokenError> for ServiceError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Configuration(msg) => ServiceError::Configuration(msg),
            TokenError::Invalid(_) => ServiceError::Authentication(AuthFailure::InvalidToken),
            TokenError::Expired => ServiceError::Authentication(AuthFailure::ExpiredToken),
        }
    }
}

/// Verified token payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

impl Claims {
    /// The identity id carried in `sub`.
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|e| TokenError::Invalid(format!("bad subject: {}", e)))
    }

    /// Exact, case-sensitive membership test.
    pub fn has_permission(&self, code: &str) -> bool {
        self.permissions.iter().any(|p| p == code)
    }
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies tokens with an injected secret.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
    issuer: String,
}

impl TokenService {
    /// ## Errors
    ///
    /// * `TokenError::Configuration` - secret shorter than 32 characters,
    ///   TTL outside `1..=MAX_TOKEN_TTL_SECS` seconds, or empty issuer
    pub fn new(secret: &str, ttl: Duration, issuer: &str) -> Result<Self, TokenError> {
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(TokenError::Configuration(format!(
                "signing secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        if ttl.as_secs() == 0 {
            return Err(TokenError::Configuration("token lifetime must be at least one second".into()));
        }
        if ttl.as_secs() > MAX_TOKEN_TTL_SECS {
            return Err(TokenError::Configuration(format!(
                "token lifetime must be at most {} seconds",
                MAX_TOKEN_TTL_SECS
            )));
        }
        if issuer.is_empty() {
            return Err(TokenError::Configuration("issuer must not be empty".into()));
        }

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        // Expiry is checked against an explicit clock in `validate_at`.
        validation.validate_exp = false;
        validation.set_issuer(&[issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl,
            issuer: issuer.to_string(),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `user_id` carrying the given roles and permissions.
    pub fn issue(
        &self,
        user_id: Uuid,
        username: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
    ) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, username, roles, permissions, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: Uuid,
        username: &str,
        roles: Vec<String>,
        permissions: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, TokenError> {
        let iat = now.timestamp();
        let exp = i64::try_from(self.ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or_else(|| TokenError::Configuration("expiry out of range".into()))?;
        let expires_at = DateTime::from_timestamp(exp, 0)
            .ok_or_else(|| TokenError::Configuration("expiry out of range".into()))?;

        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            roles,
            permissions,
            iat,
            exp,
            iss: self.issuer.clone(),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Configuration(format!("signing failed: {}", e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verify signature, algorithm, issuer and `now < exp`.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now())
    }

    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| TokenError::Invalid(e.to_string()))?;
        let claims = data.claims;

        if claims.exp <= claims.iat {
            return Err(TokenError::Invalid("expiry precedes issuance".into()));
        }
        claims.user_id()?;
        if now.timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";
    const ISSUER: &str = "oracle-dba-platform";

    fn service() -> TokenService {
        TokenService::new(SECRET, Duration::from_secs(3600), ISSUER).unwrap()
    }

    fn perms(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_short_secret_is_configuration_error() {
        let err = TokenService::new("too-short", Duration::from_secs(60), ISSUER)
            .err()
            .unwrap();
        assert!(matches!(err, TokenError::Configuration(_)));
    }

    #[test]
    fn test_unbounded_lifetime_is_configuration_error() {
        for secs in [MAX_TOKEN_TTL_SECS + 1, i64::MAX as u64, u64::MAX] {
            let err = TokenService::new(SECRET, Duration::from_secs(secs), ISSUER)
                .err()
                .unwrap();
            assert!(matches!(err, TokenError::Configuration(_)));
        }
    }

    #[test]
    fn test_longest_lifetime_issues_valid_token() {
        let svc = TokenService::new(SECRET, Duration::from_secs(MAX_TOKEN_TTL_SECS), ISSUER).unwrap();
        let issued = svc.issue(Uuid::new_v4(), "dba1", vec![], vec![]).unwrap();

        let claims = svc.validate(&issued.token).unwrap();
        assert_eq!(claims.exp - claims.iat, MAX_TOKEN_TTL_SECS as i64);
    }

    #[test]
    fn test_expiry_past_calendar_range_is_configuration_error() {
        let svc = service();
        let end_of_time = DateTime::<Utc>::MAX_UTC;
        let err = svc
            .issue_at(Uuid::new_v4(), "dba1", vec![], vec![], end_of_time)
            .err()
            .unwrap();
        assert!(matches!(err, TokenError::Configuration(_)));
    }

    #[test]
    fn test_issue_then_validate_returns_same_permissions() {
        let svc = service();
        let id = Uuid::new_v4();
        let issued = svc
            .issue(id, "dba1", vec!["DBA".into()], perms(&["VIEW_SESSIONS", "VIEW_LOCKS"]))
            .unwrap();

        let claims = svc.validate(&issued.token).unwrap();
        assert_eq!(claims.user_id().unwrap(), id);
        assert_eq!(claims.username, "dba1");
        assert_eq!(claims.roles, vec!["DBA".to_string()]);
        assert_eq!(claims.permissions, perms(&["VIEW_SESSIONS", "VIEW_LOCKS"]));
        assert_eq!(claims.iss, ISSUER);
        assert!(claims.exp > claims.iat);
        assert_eq!(issued.expires_at.timestamp(), claims.exp);
    }

    #[test]
    fn test_expired_token_never_validates() {
        let svc = service();
        let issued_at = Utc::now() - chrono::Duration::hours(2);
        let issued = svc
            .issue_at(Uuid::new_v4(), "old", vec![], vec![], issued_at)
            .unwrap();

        assert_eq!(svc.validate(&issued.token), Err(TokenError::Expired));

        // Exactly at expiry is already expired.
        assert_eq!(
            svc.validate_at(&issued.token, issued.expires_at),
            Err(TokenError::Expired)
        );
        let just_before = issued.expires_at - chrono::Duration::seconds(1);
        assert!(svc.validate_at(&issued.token, just_before).is_ok());
    }

    #[test]
    fn test_wrong_secret_is_invalid() {
        let other = TokenService::new("ffffffffffffffffffffffffffffffff", Duration::from_secs(3600), ISSUER)
            .unwrap();
        let issued = other
            .issue(Uuid::new_v4(), "mallory", vec!["ADMIN".into()], perms(&["MANAGE_USERS"]))
            .unwrap();

        assert!(matches!(service().validate(&issued.token), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_alternate_algorithm_rejected() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            username: "mallory".into(),
            roles: vec![],
            permissions: perms(&["MANAGE_USERS"]),
            iat: now,
            exp: now + 600,
            iss: ISSUER.into(),
        };
        let forged = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        assert!(matches!(service().validate(&forged), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_wrong_issuer_and_garbage_rejected() {
        let foreign = TokenService::new(SECRET, Duration::from_secs(3600), "someone-else").unwrap();
        let issued = foreign.issue(Uuid::new_v4(), "x", vec![], vec![]).unwrap();
        assert!(matches!(service().validate(&issued.token), Err(TokenError::Invalid(_))));

        assert!(matches!(service().validate("not.a.jwt"), Err(TokenError::Invalid(_))));
        assert!(matches!(service().validate(""), Err(TokenError::Invalid(_))));
    }

    #[test]
    fn test_token_error_maps_to_auth_failure() {
        assert!(matches!(
            ServiceError::from(TokenError::Expired),
            ServiceError::Authentication(AuthFailure::ExpiredToken)
        ));
        assert!(matches!(
            ServiceError::from(TokenError::Invalid("x".into())),
            ServiceError::Authentication(AuthFailure::InvalidToken)
        ));
    }
}
