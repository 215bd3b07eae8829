//! # Permission Registry
//!
//! The closed set of permission codes the platform understands, the
//! default roles, and the start-up routine that seeds and validates the
//! persisted catalog against them.
//!
//! | Role | Permissions |
//! |------|-------------|
//! | `ADMIN` | all |
//! | `DBA` | VIEW_SESSIONS, VIEW_LOCKS, VIEW_TABLESPACES, VIEW_SQL, VIEW_SCHEMA, AUDIT_READ |
//! | `DEVELOPER` | VIEW_SESSIONS, VIEW_SQL |
//! | `READ_ONLY` | VIEW_TABLESPACES |

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{info, warn};

use crate::db::stores::IdentityStore;
use crate::db::DatabaseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ViewSessions,
    ViewLocks,
    ViewTablespaces,
    ViewSql,
    ViewSchema,
    ManageUsers,
    ManageRoles,
    AuditRead,
    SessionKill,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::ViewSessions,
        Permission::ViewLocks,
        Permission::ViewTablespaces,
        Permission::ViewSql,
        Permission::ViewSchema,
        Permission::ManageUsers,
        Permission::ManageRoles,
        Permission::AuditRead,
        Permission::SessionKill,
    ];

    /// The stable catalog code.
    pub fn code(&self) -> &'static str {
        match self {
            Permission::ViewSessions => "VIEW_SESSIONS",
            Permission::ViewLocks => "VIEW_LOCKS",
            Permission::ViewTablespaces => "VIEW_TABLESPACES",
            Permission::ViewSql => "VIEW_SQL",
            Permission::ViewSchema => "VIEW_SCHEMA",
            Permission::ManageUsers => "MANAGE_USERS",
            Permission::ManageRoles => "MANAGE_ROLES",
            Permission::AuditRead => "AUDIT_READ",
            Permission::SessionKill => "SESSION_KILL",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Permission::ViewSessions => "View database sessions",
            Permission::ViewLocks => "View blocking sessions and locks",
            Permission::ViewTablespaces => "View tablespace capacity",
            Permission::ViewSql => "View SQL performance statistics",
            Permission::ViewSchema => "View schema object inventory",
            Permission::ManageUsers => "Create and deactivate users",
            Permission::ManageRoles => "Assign and revoke roles",
            Permission::AuditRead => "Read the audit trail",
            Permission::SessionKill => "Terminate database sessions",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.code() == s)
            .ok_or_else(|| format!("unknown permission code: {}", s))
    }
}

/// Roles seeded at deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultRole {
    Admin,
    Dba,
    Developer,
    ReadOnly,
}

impl DefaultRole {
    pub const ALL: [DefaultRole; 4] = [
        DefaultRole::Admin,
        DefaultRole::Dba,
        DefaultRole::Developer,
        DefaultRole::ReadOnly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DefaultRole::Admin => "ADMIN",
            DefaultRole::Dba => "DBA",
            DefaultRole::Developer => "DEVELOPER",
            DefaultRole::ReadOnly => "READ_ONLY",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DefaultRole::Admin => "Full platform administration",
            DefaultRole::Dba => "Database administrator (read-only monitoring)",
            DefaultRole::Developer => "Application developer",
            DefaultRole::ReadOnly => "Capacity dashboards only",
        }
    }

    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            DefaultRole::Admin => &Permission::ALL,
            DefaultRole::Dba => &[
                ViewSessions,
                ViewLocks,
                ViewTablespaces,
                ViewSql,
                ViewSchema,
                AuditRead,
            ],
            DefaultRole::Developer => &[ViewSessions, ViewSql],
            DefaultRole::ReadOnly => &[ViewTablespaces],
        }
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("permission catalog is missing registry codes: {0:?}")]
    MissingCodes(Vec<String>),

    #[error("permission catalog unavailable: {0}")]
    Store(#[from] DatabaseError),
}

/// Check persisted codes against the registry.
///
/// Returns the catalog codes the registry does not know; those are
/// carried as opaque strings.
pub fn validate_catalog(catalog_codes: &[String]) -> Result<Vec<String>, CatalogError> {
    let present: HashSet<&str> = catalog_codes.iter().map(String::as_str).collect();

    let missing: Vec<String> = Permission::ALL
        .iter()
        .filter(|p| !present.contains(p.code()))
        .map(|p| p.code().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(CatalogError::MissingCodes(missing));
    }

    Ok(catalog_codes
        .iter()
        .filter(|code| code.parse::<Permission>().is_err())
        .cloned()
        .collect())
}

/// Upsert the registry and default roles, then validate the catalog.
///
/// Existing rows and operator-made grants are left in place.
pub async fn seed_catalog(store: &dyn IdentityStore) -> Result<(), CatalogError> {
    info!("Seeding permission catalog");

    let mut permission_ids = Vec::with_capacity(Permission::ALL.len());
    for permission in Permission::ALL {
        let id = store
            .ensure_permission(permission.code(), permission.description())
            .await?;
        permission_ids.push((permission, id));
    }

    for role in DefaultRole::ALL {
        let role_id = store.ensure_role(role.name(), role.description()).await?;
        for (permission, permission_id) in &permission_ids {
            if role.permissions().contains(permission) {
                store.grant_permission(role_id, *permission_id).await?;
            }
        }
    }

    let codes: Vec<String> = store
        .list_permissions()
        .await?
        .into_iter()
        .map(|p| p.code)
        .collect();

    let unknown = validate_catalog(&codes)?;
    for code in &unknown {
        warn!("Catalog permission {} is not in the registry", code);
    }

    info!(
        "Permission catalog ready ({} codes, {} roles)",
        codes.len(),
        DefaultRole::ALL.len()
    );
    Ok(())
}
