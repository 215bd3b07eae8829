//! # Identity Service
//!
//! Login, operator accounts and role assignments.
//!
//! ## Login Flow
//!
//! ```text
//! username/password
//!      ↓
//! look up identity ──(absent)──► FAILURE audit, InvalidCredentials
//!      ↓
//! argon2 verify ──(mismatch)──► FAILURE audit, InvalidCredentials
//!      ↓
//! active? ──(no)──► FAILURE audit, InactiveAccount
//!      ↓
//! roles + permission closure from the catalog
//!      ↓
//! issue token, touch last_login, SUCCESS audit
//! ```

use std::sync::Arc;

use argon2::Argon2;
use chrono::{DateTime, Utc};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BootstrapAdmin;
use crate::db::stores::IdentityStore;
use crate::db::{AuditOutcome, DatabaseError, IdentityRecord, NewAuditEntry, PermissionRecord, RoleRecord};
use crate::services::audit::AuditSink;
use crate::services::authorization::AuthorizationGuard;
use crate::services::error::{AuthFailure, ServiceError};
use crate::services::permissions::{DefaultRole, Permission};
use crate::services::token_service::{Claims, TokenService};

const RESOURCE_AUTH: &str = "AUTH";
const RESOURCE_USER: &str = "USER";
const RESOURCE_ROLE_ASSIGNMENT: &str = "ROLE_ASSIGNMENT";

pub const MIN_PASSWORD_LEN: usize = 8;

/// Hash a plain password with argon2id.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServiceError::Configuration(format!("password hashing failed: {}", e)))
}

/// Verify a password against a PHC-formatted hash. Malformed hashes never verify.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Parse a path or body identifier.
pub fn parse_id(kind: &str, raw: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ServiceError::Validation(format!("malformed {} id: {}", kind, raw)))
}

fn validate_username(username: &str) -> Result<(), ServiceError> {
    let len = username.chars().count();
    if !(3..=64).contains(&len) {
        return Err(ServiceError::Validation("username must be 3 to 64 characters".into()));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(ServiceError::Validation(
            "username may only contain letters, digits, '.', '_' and '-'".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ServiceError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ServiceError::Validation(format!("invalid email: {}", email))),
    }
}

fn validate_password(password: &str) -> Result<(), ServiceError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServiceError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: IdentityRecord,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

/// The caller's own identity as seen through their token.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: IdentityRecord,
    /// Roles and permissions frozen into the presented token.
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role_ids: Vec<Uuid>,
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    tokens: TokenService,
    guard: AuthorizationGuard,
    audit: AuditSink,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        tokens: TokenService,
        guard: AuthorizationGuard,
        audit: AuditSink,
    ) -> Self {
        Self { store, tokens, guard, audit }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, ServiceError> {
        let username = username.trim();
        let user = match self.store.user_by_username(username).await? {
            Some(user) => user,
            None => {
                self.audit_login(None, username, AuditOutcome::Failure, Some("unknown username"))
                    .await;
                return Err(AuthFailure::InvalidCredentials.into());
            }
        };

        let candidate = password.to_string();
        let hash = user.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || verify_password(&candidate, &hash))
            .await
            .unwrap_or(false);
        if !verified {
            self.audit_login(Some(user.id), username, AuditOutcome::Failure, Some("wrong password"))
                .await;
            return Err(AuthFailure::InvalidCredentials.into());
        }

        if !user.is_active {
            self.audit_login(Some(user.id), username, AuditOutcome::Failure, Some("inactive account"))
                .await;
            return Err(AuthFailure::InactiveAccount.into());
        }

        let roles: Vec<String> = self
            .store
            .roles_for_user(user.id)
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        let mut permissions = self.store.permission_codes_for_user(user.id).await?;
        permissions.sort();
        permissions.dedup();

        let issued = self
            .tokens
            .issue(user.id, &user.username, roles.clone(), permissions.clone())?;

        let now = Utc::now();
        if let Err(e) = self.store.touch_last_login(user.id, now).await {
            warn!("Could not update last login for {}: {}", user.username, e);
        }
        self.audit_login(Some(user.id), username, AuditOutcome::Success, None).await;
        info!("{} logged in with roles {:?}", user.username, roles);

        Ok(AuthSession {
            token: issued.token,
            expires_at: issued.expires_at,
            user: IdentityRecord { last_login_at: Some(now), ..user },
            roles,
            permissions,
        })
    }

    async fn audit_login(
        &self,
        actor_id: Option<Uuid>,
        username: &str,
        outcome: AuditOutcome,
        detail: Option<&str>,
    ) {
        let mut entry = NewAuditEntry::new(actor_id, username, "LOGIN", RESOURCE_AUTH, outcome);
        if let Some(detail) = detail {
            entry = entry.with_error(detail);
        }
        self.audit.record(entry).await;
    }

    pub async fn me(&self, claims: &Claims) -> Result<Profile, ServiceError> {
        let id = claims.user_id()?;
        let user = self
            .store
            .user_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {}", id)))?;

        Ok(Profile {
            user,
            roles: claims.roles.clone(),
            permissions: claims.permissions.clone(),
            token_expires_at: DateTime::from_timestamp(claims.exp, 0),
        })
    }

    pub async fn create_user(&self, claims: &Claims, new_user: NewUser) -> Result<IdentityRecord, ServiceError> {
        self.guard.require(Some(claims), Permission::ManageUsers).await?;

        let result = self.insert_user(new_user).await;
        let (outcome, resource_id, detail) = match &result {
            Ok(user) => (AuditOutcome::Success, user.id.to_string(), None),
            Err(e) => (AuditOutcome::Failure, String::new(), Some(e.to_string())),
        };
        let mut entry = NewAuditEntry::new(
            claims.user_id().ok(),
            &claims.username,
            "CREATE_USER",
            RESOURCE_USER,
            outcome,
        );
        if !resource_id.is_empty() {
            entry = entry.with_resource_id(resource_id);
        }
        if let Some(detail) = detail {
            entry = entry.with_error(detail);
        }
        self.audit.record(entry).await;

        result
    }

    async fn insert_user(&self, new_user: NewUser) -> Result<IdentityRecord, ServiceError> {
        let username = new_user.username.trim().to_string();
        let email = new_user.email.trim().to_lowercase();
        validate_username(&username)?;
        validate_email(&email)?;
        validate_password(&new_user.password)?;

        let password = new_user.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ServiceError::Configuration(format!("hashing worker failed: {}", e)))??;

        let user = IdentityRecord {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            is_active: true,
            created_at: Utc::now(),
            last_login_at: None,
        };
        self.store
            .create_user(&user, &new_user.role_ids)
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(_) => {
                    ServiceError::Validation("username or email already exists".into())
                }
                other => not_found(other),
            })?;

        info!("Created user {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Soft-activate or deactivate an identity.
    pub async fn set_active(&self, claims: &Claims, user_id: Uuid, active: bool) -> Result<(), ServiceError> {
        self.guard.require(Some(claims), Permission::ManageUsers).await?;

        let action = if active { "ACTIVATE_USER" } else { "DEACTIVATE_USER" };
        let result = self.store.set_active(user_id, active).await.map_err(not_found);
        self.audit_mutation(claims, action, RESOURCE_USER, user_id.to_string(), &result)
            .await;
        result
    }

    pub async fn assign_role(&self, claims: &Claims, user_id: Uuid, role_id: Uuid) -> Result<bool, ServiceError> {
        self.guard.require(Some(claims), Permission::ManageRoles).await?;

        let result = self.change_role(user_id, role_id, true).await;
        self.audit_mutation(
            claims,
            "ASSIGN_ROLE",
            RESOURCE_ROLE_ASSIGNMENT,
            format!("{}:{}", user_id, role_id),
            &result,
        )
        .await;
        result
    }

    pub async fn revoke_role(&self, claims: &Claims, user_id: Uuid, role_id: Uuid) -> Result<bool, ServiceError> {
        self.guard.require(Some(claims), Permission::ManageRoles).await?;

        let result = self.change_role(user_id, role_id, false).await;
        self.audit_mutation(
            claims,
            "REVOKE_ROLE",
            RESOURCE_ROLE_ASSIGNMENT,
            format!("{}:{}", user_id, role_id),
            &result,
        )
        .await;
        result
    }

    /// Returns whether the assignment set changed.
    async fn change_role(&self, user_id: Uuid, role_id: Uuid, assign: bool) -> Result<bool, ServiceError> {
        if self.store.user_by_id(user_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("user {}", user_id)));
        }
        if self.store.role_by_id(role_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("role {}", role_id)));
        }
        let changed = if assign {
            self.store.assign_role(user_id, role_id).await?
        } else {
            self.store.revoke_role(user_id, role_id).await?
        };
        Ok(changed)
    }

    async fn audit_mutation<T>(
        &self,
        claims: &Claims,
        action: &str,
        resource_type: &str,
        resource_id: String,
        result: &Result<T, ServiceError>,
    ) {
        let outcome = if result.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failure };
        let mut entry = NewAuditEntry::new(
            claims.user_id().ok(),
            &claims.username,
            action,
            resource_type,
            outcome,
        )
        .with_resource_id(resource_id);
        if let Err(e) = result {
            entry = entry.with_error(e.to_string());
        }
        self.audit.record(entry).await;
    }

    pub async fn list_users(&self, claims: &Claims) -> Result<Vec<IdentityRecord>, ServiceError> {
        self.guard.require(Some(claims), Permission::ManageUsers).await?;
        Ok(self.store.list_users().await?)
    }

    /// Any authenticated caller may list roles.
    pub async fn list_roles(&self, _claims: &Claims) -> Result<Vec<RoleRecord>, ServiceError> {
        Ok(self.store.list_roles().await?)
    }

    /// Any authenticated caller may list permissions.
    pub async fn list_permissions(&self, _claims: &Claims) -> Result<Vec<PermissionRecord>, ServiceError> {
        Ok(self.store.list_permissions().await?)
    }

    /// Create the configured ADMIN account unless the username exists.
    pub async fn bootstrap_admin(&self, admin: &BootstrapAdmin) -> Result<(), ServiceError> {
        if self.store.user_by_username(&admin.username).await?.is_some() {
            info!("Bootstrap admin {} already exists", admin.username);
            return Ok(());
        }
        let role = self
            .store
            .role_by_name(DefaultRole::Admin.name())
            .await?
            .ok_or_else(|| ServiceError::Configuration("ADMIN role missing from catalog".into()))?;

        let user = self
            .insert_user(NewUser {
                username: admin.username.clone(),
                email: admin.email.clone(),
                password: admin.password.clone(),
                role_ids: vec![role.id],
            })
            .await?;

        self.audit
            .record(
                NewAuditEntry::new(None, "bootstrap", "CREATE_USER", RESOURCE_USER, AuditOutcome::Success)
                    .with_resource_id(user.id.to_string()),
            )
            .await;
        info!("Bootstrap admin {} created", user.username);
        Ok(())
    }
}

fn not_found(e: DatabaseError) -> ServiceError {
    match e {
        DatabaseError::NotFound(what) => ServiceError::NotFound(what),
        other => other.into(),
    }
}
