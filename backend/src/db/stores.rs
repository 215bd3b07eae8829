//! # Store Traits
//!
//! The persistence contracts the services consume. `Database` implements
//! each of them on top of [`queries`](super::queries); tests substitute
//! in-memory implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::models::*;
use super::{queries, Database, DatabaseError};

/// Append-only audit collection with conjunctive filtered reads.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one entry (a single atomic insert).
    async fn insert(&self, entry: &AuditEntry) -> Result<(), DatabaseError>;

    /// Entries matching `filter`, newest first.
    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, DatabaseError>;

    /// Number of entries matching `filter`, ignoring limit/offset.
    async fn count(&self, filter: &AuditFilter) -> Result<i64, DatabaseError>;
}

/// Append-only metric snapshot collection.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot, assigning a `collected_at` strictly greater than
    /// any earlier snapshot of the same key.
    async fn append(
        &self,
        metric_type: &str,
        target: &str,
        payload: &serde_json::Value,
    ) -> Result<MetricSnapshot, DatabaseError>;

    async fn latest(
        &self,
        metric_type: &str,
        target: &str,
    ) -> Result<Option<MetricSnapshot>, DatabaseError>;

    /// Snapshots with `start <= collected_at <= end`, oldest first.
    async fn range(
        &self,
        metric_type: &str,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, DatabaseError>;
}

/// Identities, roles and the permission catalog.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn user_by_username(&self, username: &str) -> Result<Option<IdentityRecord>, DatabaseError>;
    async fn user_by_id(&self, id: Uuid) -> Result<Option<IdentityRecord>, DatabaseError>;
    async fn list_users(&self) -> Result<Vec<IdentityRecord>, DatabaseError>;
    /// Insert the user together with its initial roles, all or nothing.
    /// An unknown role id is `NotFound` and leaves no user behind.
    async fn create_user(&self, user: &IdentityRecord, role_ids: &[Uuid]) -> Result<(), DatabaseError>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError>;
    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, DatabaseError>;
    async fn role_by_id(&self, id: Uuid) -> Result<Option<RoleRecord>, DatabaseError>;
    async fn role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, DatabaseError>;
    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<RoleRecord>, DatabaseError>;
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError>;
    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError>;

    async fn list_permissions(&self) -> Result<Vec<PermissionRecord>, DatabaseError>;

    /// Distinct permission codes over all roles assigned to the user.
    async fn permission_codes_for_user(&self, user_id: Uuid) -> Result<Vec<String>, DatabaseError>;

    /// Insert the role if missing; returns its id.
    async fn ensure_role(&self, name: &str, description: &str) -> Result<Uuid, DatabaseError>;

    /// Insert the permission if missing; returns its id.
    async fn ensure_permission(&self, code: &str, description: &str) -> Result<Uuid, DatabaseError>;

    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<(), DatabaseError>;
}

#[async_trait]
impl AuditStore for Database {
    async fn insert(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        queries::audit_insert(self.pool(), entry).await
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, DatabaseError> {
        queries::audit_list(self.pool(), filter).await
    }

    async fn count(&self, filter: &AuditFilter) -> Result<i64, DatabaseError> {
        queries::audit_count(self.pool(), filter).await
    }
}

#[async_trait]
impl SnapshotStore for Database {
    async fn append(
        &self,
        metric_type: &str,
        target: &str,
        payload: &serde_json::Value,
    ) -> Result<MetricSnapshot, DatabaseError> {
        queries::snapshot_insert(self.pool(), metric_type, target, payload).await
    }

    async fn latest(
        &self,
        metric_type: &str,
        target: &str,
    ) -> Result<Option<MetricSnapshot>, DatabaseError> {
        queries::snapshot_latest(self.pool(), metric_type, target).await
    }

    async fn range(
        &self,
        metric_type: &str,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, DatabaseError> {
        queries::snapshot_range(self.pool(), metric_type, target, start, end).await
    }
}

#[async_trait]
impl IdentityStore for Database {
    async fn user_by_username(&self, username: &str) -> Result<Option<IdentityRecord>, DatabaseError> {
        queries::user_by_username(self.pool(), username).await
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<IdentityRecord>, DatabaseError> {
        queries::user_by_id(self.pool(), id).await
    }

    async fn list_users(&self) -> Result<Vec<IdentityRecord>, DatabaseError> {
        queries::user_list(self.pool()).await
    }

    async fn create_user(&self, user: &IdentityRecord, role_ids: &[Uuid]) -> Result<(), DatabaseError> {
        queries::user_create(self.pool(), user, role_ids).await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError> {
        queries::user_set_active(self.pool(), id, active).await
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        queries::user_touch_last_login(self.pool(), id, at).await
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, DatabaseError> {
        queries::role_list(self.pool()).await
    }

    async fn role_by_id(&self, id: Uuid) -> Result<Option<RoleRecord>, DatabaseError> {
        queries::role_by_id(self.pool(), id).await
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, DatabaseError> {
        queries::role_by_name(self.pool(), name).await
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<RoleRecord>, DatabaseError> {
        queries::role_list_for_user(self.pool(), user_id).await
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        queries::role_assign(self.pool(), user_id, role_id).await
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        queries::role_revoke(self.pool(), user_id, role_id).await
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionRecord>, DatabaseError> {
        queries::permission_list(self.pool()).await
    }

    async fn permission_codes_for_user(&self, user_id: Uuid) -> Result<Vec<String>, DatabaseError> {
        queries::permission_codes_for_user(self.pool(), user_id).await
    }

    async fn ensure_role(&self, name: &str, description: &str) -> Result<Uuid, DatabaseError> {
        queries::role_ensure(self.pool(), name, description).await
    }

    async fn ensure_permission(&self, code: &str, description: &str) -> Result<Uuid, DatabaseError> {
        queries::permission_ensure(self.pool(), code, description).await
    }

    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<(), DatabaseError> {
        queries::role_grant_permission(self.pool(), role_id, permission_id).await
    }
}
