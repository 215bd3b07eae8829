//! # Database Queries
//!
//! This module contains all the SQL queries for interacting with the database.
//! Each function performs a specific database operation.
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `user_*` / `role_*` / `permission_*` - Identity and catalog operations
//! - `audit_*` - Audit trail operations (insert and filtered reads only)
//! - `snapshot_*` - Metric snapshot operations (insert and reads only)
//!
//! ## Error Handling
//!
//! All queries return `Result<T, DatabaseError>`. Common errors:
//! - `NotFound` - Record doesn't exist
//! - `Conflict` - Unique constraint violated
//! - `QueryError` - SQL execution failed

use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::DatabaseError;
use crate::utils::next_collected_at;

// ============================================
// HELPER FUNCTIONS
// ============================================

fn row_to_user(row: &Row) -> IdentityRecord {
    IdentityRecord {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
        last_login_at: row.get("last_login_at"),
    }
}

fn row_to_role(row: &Row) -> RoleRecord {
    RoleRecord {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
    }
}

fn row_to_permission(row: &Row) -> PermissionRecord {
    PermissionRecord {
        id: row.get("id"),
        code: row.get("code"),
        description: row.get("description"),
    }
}

fn row_to_audit_entry(row: &Row) -> Result<AuditEntry, DatabaseError> {
    let outcome: String = row.get("outcome");
    Ok(AuditEntry {
        id: row.get("id"),
        actor_id: row.get("actor_id"),
        actor_name: row.get("actor_name"),
        action: row.get("action"),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        outcome: outcome.parse().map_err(DatabaseError::Corrupt)?,
        error_detail: row.get("error_detail"),
        occurred_at: row.get("occurred_at"),
    })
}

fn row_to_snapshot(row: &Row) -> MetricSnapshot {
    MetricSnapshot {
        id: row.get("id"),
        metric_type: row.get("metric_type"),
        target: row.get("target"),
        collected_at: row.get("collected_at"),
        payload: row.get("payload"),
    }
}

/// Map a unique violation to `Conflict`, everything else to `QueryError`.
fn conflict_or(e: tokio_postgres::Error, what: &str) -> DatabaseError {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        DatabaseError::Conflict(what.to_string())
    } else {
        DatabaseError::QueryError(e)
    }
}

// ============================================
// USER QUERIES
// ============================================

const USER_COLUMNS: &str =
    "id, username, email, password_hash, is_active, created_at, last_login_at";

/// Get a user by login name.
pub async fn user_by_username(
    pool: &Pool,
    username: &str,
) -> Result<Option<IdentityRecord>, DatabaseError> {
    debug!("Fetching user: {}", username);

    let client = pool.get().await?;
    let rows = client
        .query(
            &format!("SELECT {} FROM auth.users WHERE username = $1", USER_COLUMNS),
            &[&username],
        )
        .await?;

    Ok(rows.first().map(row_to_user))
}

/// Get a user by id.
pub async fn user_by_id(pool: &Pool, id: Uuid) -> Result<Option<IdentityRecord>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            &format!("SELECT {} FROM auth.users WHERE id = $1", USER_COLUMNS),
            &[&id],
        )
        .await?;

    Ok(rows.first().map(row_to_user))
}

/// List all users ordered by username.
pub async fn user_list(pool: &Pool) -> Result<Vec<IdentityRecord>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            &format!("SELECT {} FROM auth.users ORDER BY username", USER_COLUMNS),
            &[],
        )
        .await?;

    Ok(rows.iter().map(row_to_user).collect())
}

/// Insert a new user and its initial roles in one transaction.
/// Username and email must be unused.
pub async fn user_create(
    pool: &Pool,
    user: &IdentityRecord,
    role_ids: &[Uuid],
) -> Result<(), DatabaseError> {
    debug!("Creating user: {}", user.username);

    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    tx.execute(
            r#"
            INSERT INTO auth.users (
                id, username, email, password_hash, is_active, created_at, last_login_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
            &[
                &user.id,
                &user.username,
                &user.email,
                &user.password_hash,
                &user.is_active,
                &user.created_at,
                &user.last_login_at,
            ],
        )
        .await
        .map_err(|e| conflict_or(e, "username or email"))?;

    for role_id in role_ids {
        tx.execute(
            r#"
            INSERT INTO auth.user_roles (user_id, role_id, assigned_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
            &[&user.id, role_id],
        )
        .await
        .map_err(|e| {
            if e.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) {
                DatabaseError::NotFound(format!("role {}", role_id))
            } else {
                DatabaseError::QueryError(e)
            }
        })?;
    }

    tx.commit().await?;

    info!("User created: {} with {} roles", user.username, role_ids.len());
    Ok(())
}

/// Activate or deactivate a user. Users are never hard-deleted.
pub async fn user_set_active(pool: &Pool, id: Uuid, active: bool) -> Result<(), DatabaseError> {
    let client = pool.get().await?;
    let rows_affected = client
        .execute(
            "UPDATE auth.users SET is_active = $2 WHERE id = $1",
            &[&id, &active],
        )
        .await?;

    if rows_affected == 0 {
        return Err(DatabaseError::NotFound(format!("User not found: {}", id)));
    }
    Ok(())
}

/// Stamp a successful login.
pub async fn user_touch_last_login(
    pool: &Pool,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let client = pool.get().await?;
    client
        .execute(
            "UPDATE auth.users SET last_login_at = $2 WHERE id = $1",
            &[&id, &at],
        )
        .await?;
    Ok(())
}

// ============================================
// ROLE / PERMISSION QUERIES
// ============================================

/// List all roles ordered by name.
pub async fn role_list(pool: &Pool) -> Result<Vec<RoleRecord>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query("SELECT id, name, description FROM auth.roles ORDER BY name", &[])
        .await?;
    Ok(rows.iter().map(row_to_role).collect())
}

/// Get a role by id.
pub async fn role_by_id(pool: &Pool, id: Uuid) -> Result<Option<RoleRecord>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, name, description FROM auth.roles WHERE id = $1",
            &[&id],
        )
        .await?;
    Ok(rows.first().map(row_to_role))
}

/// Get a role by name.
pub async fn role_by_name(pool: &Pool, name: &str) -> Result<Option<RoleRecord>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, name, description FROM auth.roles WHERE name = $1",
            &[&name],
        )
        .await?;
    Ok(rows.first().map(row_to_role))
}

/// Roles currently assigned to a user.
pub async fn role_list_for_user(
    pool: &Pool,
    user_id: Uuid,
) -> Result<Vec<RoleRecord>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT r.id, r.name, r.description
            FROM auth.roles r
            INNER JOIN auth.user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1
            ORDER BY r.name
            "#,
            &[&user_id],
        )
        .await?;
    Ok(rows.iter().map(row_to_role).collect())
}

/// List the whole permission catalog ordered by code.
pub async fn permission_list(pool: &Pool) -> Result<Vec<PermissionRecord>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, code, description FROM auth.permissions ORDER BY code",
            &[],
        )
        .await?;
    Ok(rows.iter().map(row_to_permission).collect())
}

/// Closure of permission codes over every role assigned to a user.
pub async fn permission_codes_for_user(
    pool: &Pool,
    user_id: Uuid,
) -> Result<Vec<String>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT DISTINCT p.code
            FROM auth.permissions p
            INNER JOIN auth.role_permissions rp ON rp.permission_id = p.id
            INNER JOIN auth.user_roles ur ON ur.role_id = rp.role_id
            WHERE ur.user_id = $1
            ORDER BY p.code
            "#,
            &[&user_id],
        )
        .await?;
    Ok(rows.iter().map(|row| row.get("code")).collect())
}

/// Assign a role. Returns `false` if the pair already existed.
pub async fn role_assign(pool: &Pool, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
    let client = pool.get().await?;
    let inserted = client
        .execute(
            r#"
            INSERT INTO auth.user_roles (user_id, role_id, assigned_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
            &[&user_id, &role_id],
        )
        .await?;
    Ok(inserted == 1)
}

/// Revoke a role. Returns `false` if it was not assigned.
pub async fn role_revoke(pool: &Pool, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
    let client = pool.get().await?;
    let deleted = client
        .execute(
            "DELETE FROM auth.user_roles WHERE user_id = $1 AND role_id = $2",
            &[&user_id, &role_id],
        )
        .await?;
    Ok(deleted == 1)
}

/// Insert a role if its name is unused. Returns the role id either way.
pub async fn role_ensure(pool: &Pool, name: &str, description: &str) -> Result<Uuid, DatabaseError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO auth.roles (id, name, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
            &[&Uuid::new_v4(), &name, &description],
        )
        .await?;
    Ok(row.get("id"))
}

/// Insert a permission if its code is unused. Returns the id either way.
pub async fn permission_ensure(
    pool: &Pool,
    code: &str,
    description: &str,
) -> Result<Uuid, DatabaseError> {
    let client = pool.get().await?;
    let row = client
        .query_one(
            r#"
            INSERT INTO auth.permissions (id, code, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code
            RETURNING id
            "#,
            &[&Uuid::new_v4(), &code, &description],
        )
        .await?;
    Ok(row.get("id"))
}

/// Grant a permission to a role (no-op if already granted).
pub async fn role_grant_permission(
    pool: &Pool,
    role_id: Uuid,
    permission_id: Uuid,
) -> Result<(), DatabaseError> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO auth.role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
            &[&role_id, &permission_id],
        )
        .await?;
    Ok(())
}

// ============================================
// AUDIT QUERIES
// ============================================

/// WHERE clause plus bound parameters for an `AuditFilter`.
struct AuditWhere<'a> {
    clause: String,
    params: Vec<&'a (dyn ToSql + Sync)>,
}

fn audit_where<'a>(filter: &'a AuditFilter, outcome: &'a Option<&'static str>) -> AuditWhere<'a> {
    let mut clause = String::from("WHERE 1=1");
    let mut params: Vec<&'a (dyn ToSql + Sync)> = Vec::new();

    if let Some(actor_id) = &filter.actor_id {
        params.push(actor_id);
        clause.push_str(&format!(" AND actor_id = ${}", params.len()));
    }
    if let Some(action) = &filter.action {
        params.push(action);
        clause.push_str(&format!(" AND action = ${}", params.len()));
    }
    if let Some(resource_type) = &filter.resource_type {
        params.push(resource_type);
        clause.push_str(&format!(" AND resource_type = ${}", params.len()));
    }
    if let Some(outcome) = outcome {
        params.push(outcome);
        clause.push_str(&format!(" AND outcome = ${}", params.len()));
    }
    if let Some(start) = &filter.start {
        params.push(start);
        clause.push_str(&format!(" AND occurred_at >= ${}", params.len()));
    }
    if let Some(end) = &filter.end {
        params.push(end);
        clause.push_str(&format!(" AND occurred_at <= ${}", params.len()));
    }

    AuditWhere { clause, params }
}

/// Append one audit entry. A single-row insert; no surrounding transaction.
pub async fn audit_insert(pool: &Pool, entry: &AuditEntry) -> Result<(), DatabaseError> {
    let client = pool.get().await?;
    client
        .execute(
            r#"
            INSERT INTO audit.entries (
                id, actor_id, actor_name, action, resource_type,
                resource_id, outcome, error_detail, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
            &[
                &entry.id,
                &entry.actor_id,
                &entry.actor_name,
                &entry.action,
                &entry.resource_type,
                &entry.resource_id,
                &entry.outcome.as_str(),
                &entry.error_detail,
                &entry.occurred_at,
            ],
        )
        .await?;
    Ok(())
}

/// Filtered audit entries, newest first.
pub async fn audit_list(pool: &Pool, filter: &AuditFilter) -> Result<Vec<AuditEntry>, DatabaseError> {
    let outcome = filter.outcome.map(|o| o.as_str());
    let mut where_ = audit_where(filter, &outcome);

    let mut sql = format!(
        r#"
        SELECT id, actor_id, actor_name, action, resource_type,
               resource_id, outcome, error_detail, occurred_at
        FROM audit.entries
        {}
        ORDER BY occurred_at DESC, id
        "#,
        where_.clause
    );
    if let Some(limit) = &filter.limit {
        where_.params.push(limit);
        sql.push_str(&format!(" LIMIT ${}", where_.params.len()));
    }
    if let Some(offset) = &filter.offset {
        where_.params.push(offset);
        sql.push_str(&format!(" OFFSET ${}", where_.params.len()));
    }

    debug!("Listing audit entries: {:?}", filter);

    let client = pool.get().await?;
    let rows = client.query(sql.as_str(), &where_.params).await?;
    rows.iter().map(row_to_audit_entry).collect()
}

/// Number of audit entries matching a filter (limit/offset ignored).
pub async fn audit_count(pool: &Pool, filter: &AuditFilter) -> Result<i64, DatabaseError> {
    let outcome = filter.outcome.map(|o| o.as_str());
    let where_ = audit_where(filter, &outcome);
    let sql = format!("SELECT COUNT(*) AS total FROM audit.entries {}", where_.clause);

    let client = pool.get().await?;
    let row = client.query_one(sql.as_str(), &where_.params).await?;
    Ok(row.get("total"))
}

// ============================================
// SNAPSHOT QUERIES
// ============================================

/// Append a snapshot with a strictly increasing `collected_at` per key.
///
/// A transaction-scoped advisory lock on the key serializes concurrent
/// writers, so two recorders cannot read the same previous timestamp.
pub async fn snapshot_insert(
    pool: &Pool,
    metric_type: &str,
    target: &str,
    payload: &serde_json::Value,
) -> Result<MetricSnapshot, DatabaseError> {
    let key = format!("{}/{}", metric_type, target);

    let mut client = pool.get().await?;
    let tx = client.transaction().await?;

    tx.execute("SELECT pg_advisory_xact_lock(hashtext($1))", &[&key])
        .await?;

    let row = tx
        .query_one(
            r#"
            SELECT MAX(collected_at) AS last
            FROM monitoring.metric_snapshots
            WHERE metric_type = $1 AND target = $2
            "#,
            &[&metric_type, &target],
        )
        .await?;
    let last: Option<DateTime<Utc>> = row.get("last");

    let snapshot = MetricSnapshot {
        id: Uuid::new_v4(),
        metric_type: metric_type.to_string(),
        target: target.to_string(),
        collected_at: next_collected_at(Utc::now(), last),
        payload: payload.clone(),
    };

    tx.execute(
        r#"
        INSERT INTO monitoring.metric_snapshots (id, metric_type, target, collected_at, payload)
        VALUES ($1, $2, $3, $4, $5)
        "#,
        &[
            &snapshot.id,
            &snapshot.metric_type,
            &snapshot.target,
            &snapshot.collected_at,
            &snapshot.payload,
        ],
    )
    .await?;

    tx.commit().await?;

    debug!("Snapshot recorded: {} at {}", key, snapshot.collected_at);
    Ok(snapshot)
}

/// Most recent snapshot for a key.
pub async fn snapshot_latest(
    pool: &Pool,
    metric_type: &str,
    target: &str,
) -> Result<Option<MetricSnapshot>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT id, metric_type, target, collected_at, payload
            FROM monitoring.metric_snapshots
            WHERE metric_type = $1 AND target = $2
            ORDER BY collected_at DESC
            LIMIT 1
            "#,
            &[&metric_type, &target],
        )
        .await?;
    Ok(rows.first().map(row_to_snapshot))
}

/// Snapshots for a key within `[start, end]`, oldest first.
pub async fn snapshot_range(
    pool: &Pool,
    metric_type: &str,
    target: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<MetricSnapshot>, DatabaseError> {
    let client = pool.get().await?;
    let rows = client
        .query(
            r#"
            SELECT id, metric_type, target, collected_at, payload
            FROM monitoring.metric_snapshots
            WHERE metric_type = $1 AND target = $2
              AND collected_at BETWEEN $3 AND $4
            ORDER BY collected_at ASC
            "#,
            &[&metric_type, &target, &start, &end],
        )
        .await?;
    Ok(rows.iter().map(row_to_snapshot).collect())
}
