//! # Authorization Guard
//!
//! The single enforcement point for guarded operations. A decision is a
//! plain membership test of permission codes in the validated claims; no
//! wildcards or hierarchy. Every denial writes exactly one `DENIED`
//! audit entry naming the missing permission.

use tracing::info;

use crate::db::{AuditOutcome, NewAuditEntry};
use crate::services::audit::AuditSink;
use crate::services::error::{AuthFailure, ServiceError};
use crate::services::permissions::Permission;
use crate::services::token_service::Claims;

pub const ACCESS_DENIED: &str = "ACCESS_DENIED";
pub const RESOURCE_PERMISSION: &str = "PERMISSION";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Carries the missing permission code(s).
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

#[derive(Clone)]
pub struct AuthorizationGuard {
    audit: AuditSink,
}

impl AuthorizationGuard {
    pub fn new(audit: AuditSink) -> Self {
        Self { audit }
    }

    /// Allow iff `required` is in the claims' permission set.
    ///
    /// `claims` is `None` when no token was validated; that is an
    /// `AuthenticationRequired` error, not a denial.
    pub async fn check(
        &self,
        claims: Option<&Claims>,
        required: Permission,
    ) -> Result<Decision, ServiceError> {
        let claims = claims.ok_or(AuthFailure::AuthenticationRequired)?;
        if claims.has_permission(required.code()) {
            return Ok(Decision::Allow);
        }
        Ok(self.deny(claims, required.code().to_string()).await)
    }

    /// Allow if any of `required` is held.
    pub async fn check_any(
        &self,
        claims: Option<&Claims>,
        required: &[Permission],
    ) -> Result<Decision, ServiceError> {
        let claims = claims.ok_or(AuthFailure::AuthenticationRequired)?;
        if required.iter().any(|p| claims.has_permission(p.code())) {
            return Ok(Decision::Allow);
        }
        let missing = join_codes(required.iter());
        Ok(self.deny(claims, missing).await)
    }

    /// Allow only if every one of `required` is held.
    pub async fn check_all(
        &self,
        claims: Option<&Claims>,
        required: &[Permission],
    ) -> Result<Decision, ServiceError> {
        let claims = claims.ok_or(AuthFailure::AuthenticationRequired)?;
        let missing: Vec<&Permission> = required
            .iter()
            .filter(|p| !claims.has_permission(p.code()))
            .collect();
        if missing.is_empty() {
            return Ok(Decision::Allow);
        }
        Ok(self.deny(claims, join_codes(missing.into_iter())).await)
    }

    /// `check`, with a denial turned into `ServiceError::Authorization`.
    pub async fn require(
        &self,
        claims: Option<&Claims>,
        required: Permission,
    ) -> Result<(), ServiceError> {
        match self.check(claims, required).await? {
            Decision::Allow => Ok(()),
            Decision::Deny(permission) => Err(ServiceError::Authorization { permission }),
        }
    }

    async fn deny(&self, claims: &Claims, missing: String) -> Decision {
        info!("Denied {} to {}", missing, claims.username);
        self.audit
            .record(
                NewAuditEntry::new(
                    claims.user_id().ok(),
                    &claims.username,
                    ACCESS_DENIED,
                    RESOURCE_PERMISSION,
                    AuditOutcome::Denied,
                )
                .with_resource_id(&missing),
            )
            .await;
        Decision::Deny(missing)
    }
}

fn join_codes<'a>(permissions: impl Iterator<Item = &'a Permission>) -> String {
    permissions.map(|p| p.code()).collect::<Vec<_>>().join(",")
}
