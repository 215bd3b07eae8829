//! In-memory store and target fakes for service tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::stores::{AuditStore, IdentityStore, SnapshotStore};
use crate::db::{
    AuditEntry, AuditFilter, DatabaseError, IdentityRecord, MetricSnapshot, PermissionRecord,
    RoleRecord,
};
use crate::oracle::{
    IntrospectionSource, RawInstance, RawInvalidObject, RawObjectCount, RawSession, RawSqlStat,
    RawTablespace, SessionScope, SqlOrder, TargetError,
};
use crate::services::permissions::Permission;
use crate::services::token_service::Claims;
use crate::utils::next_collected_at;

/// Claims for a fresh random identity, valid for an hour.
pub fn claims_with(username: &str, roles: &[&str], permissions: &[Permission]) -> Claims {
    let now = Utc::now().timestamp();
    Claims {
        sub: Uuid::new_v4().to_string(),
        username: username.to_string(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
        permissions: permissions.iter().map(|p| p.code().to_string()).collect(),
        iat: now,
        exp: now + 3600,
        iss: "oracle-dba-platform".to_string(),
    }
}

/// An idle, unblocked user session.
pub fn session(sid: i64) -> RawSession {
    RawSession {
        sid,
        serial: sid * 100 + 1,
        username: Some(format!("USER{}", sid)),
        schema_name: Some("APP".to_string()),
        os_user: Some("oracle".to_string()),
        machine: Some("app-host".to_string()),
        program: Some("JDBC Thin Client".to_string()),
        status: "INACTIVE".to_string(),
        sql_id: None,
        sql_text: None,
        logon_time: None,
        last_call_et: 0,
        blocking_session: None,
        wait_class: Some("Idle".to_string()),
        event: Some("SQL*Net message from client".to_string()),
        seconds_in_wait: None,
    }
}

#[derive(Default)]
pub struct MemoryAuditStore {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn push(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, entry: &AuditEntry) -> Result<(), DatabaseError> {
        self.push(entry.clone());
        Ok(())
    }

    async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, DatabaseError> {
        let mut matching: Vec<AuditEntry> = self
            .entries()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then(a.id.cmp(&b.id)));
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(i64::MAX).max(0) as usize;
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, filter: &AuditFilter) -> Result<i64, DatabaseError> {
        Ok(self.entries().iter().filter(|e| filter.matches(e)).count() as i64)
    }
}

/// Rejects every write.
pub struct FailingAuditStore;

#[async_trait]
impl AuditStore for FailingAuditStore {
    async fn insert(&self, _entry: &AuditEntry) -> Result<(), DatabaseError> {
        Err(DatabaseError::ConnectionError("store offline".into()))
    }

    async fn list(&self, _filter: &AuditFilter) -> Result<Vec<AuditEntry>, DatabaseError> {
        Err(DatabaseError::ConnectionError("store offline".into()))
    }

    async fn count(&self, _filter: &AuditFilter) -> Result<i64, DatabaseError> {
        Err(DatabaseError::ConnectionError("store offline".into()))
    }
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<Vec<MetricSnapshot>>,
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn append(
        &self,
        metric_type: &str,
        target: &str,
        payload: &serde_json::Value,
    ) -> Result<MetricSnapshot, DatabaseError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        let last = snapshots
            .iter()
            .filter(|s| s.metric_type == metric_type && s.target == target)
            .map(|s| s.collected_at)
            .max();
        let snapshot = MetricSnapshot {
            id: Uuid::new_v4(),
            metric_type: metric_type.to_string(),
            target: target.to_string(),
            collected_at: next_collected_at(Utc::now(), last),
            payload: payload.clone(),
        };
        snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn latest(
        &self,
        metric_type: &str,
        target: &str,
    ) -> Result<Option<MetricSnapshot>, DatabaseError> {
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.metric_type == metric_type && s.target == target)
            .max_by_key(|s| s.collected_at)
            .cloned())
    }

    async fn range(
        &self,
        metric_type: &str,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, DatabaseError> {
        let mut found: Vec<MetricSnapshot> = self
            .snapshots
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.metric_type == metric_type && s.target == target)
            .filter(|s| s.collected_at >= start && s.collected_at <= end)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.collected_at);
        Ok(found)
    }
}

#[derive(Default)]
struct IdentityTables {
    users: Vec<IdentityRecord>,
    roles: Vec<RoleRecord>,
    permissions: Vec<PermissionRecord>,
    role_permissions: HashSet<(Uuid, Uuid)>,
    user_roles: HashSet<(Uuid, Uuid)>,
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    tables: Mutex<IdentityTables>,
}

impl MemoryIdentityStore {
    /// Codes granted to one role.
    pub fn role_permission_codes(&self, role_id: Uuid) -> Vec<String> {
        let t = self.tables.lock().unwrap();
        t.permissions
            .iter()
            .filter(|p| t.role_permissions.contains(&(role_id, p.id)))
            .map(|p| p.code.clone())
            .collect()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn user_by_username(&self, username: &str) -> Result<Option<IdentityRecord>, DatabaseError> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.iter().find(|u| u.username == username).cloned())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<IdentityRecord>, DatabaseError> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn list_users(&self) -> Result<Vec<IdentityRecord>, DatabaseError> {
        let mut users = self.tables.lock().unwrap().users.clone();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn create_user(&self, user: &IdentityRecord, role_ids: &[Uuid]) -> Result<(), DatabaseError> {
        let mut t = self.tables.lock().unwrap();
        if t.users.iter().any(|u| u.username == user.username || u.email == user.email) {
            return Err(DatabaseError::Conflict(user.username.clone()));
        }
        if let Some(missing) = role_ids.iter().find(|id| !t.roles.iter().any(|r| r.id == **id)) {
            return Err(DatabaseError::NotFound(format!("role {}", missing)));
        }
        t.users.push(user.clone());
        for role_id in role_ids {
            t.user_roles.insert((user.id, *role_id));
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), DatabaseError> {
        let mut t = self.tables.lock().unwrap();
        match t.users.iter_mut().find(|u| u.id == id) {
            Some(user) => {
                user.is_active = active;
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("user {}", id))),
        }
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(user) = t.users.iter_mut().find(|u| u.id == id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<RoleRecord>, DatabaseError> {
        let mut roles = self.tables.lock().unwrap().roles.clone();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn role_by_id(&self, id: Uuid) -> Result<Option<RoleRecord>, DatabaseError> {
        let t = self.tables.lock().unwrap();
        Ok(t.roles.iter().find(|r| r.id == id).cloned())
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<RoleRecord>, DatabaseError> {
        let t = self.tables.lock().unwrap();
        Ok(t.roles.iter().find(|r| r.name == name).cloned())
    }

    async fn roles_for_user(&self, user_id: Uuid) -> Result<Vec<RoleRecord>, DatabaseError> {
        let t = self.tables.lock().unwrap();
        Ok(t.roles
            .iter()
            .filter(|r| t.user_roles.contains(&(user_id, r.id)))
            .cloned()
            .collect())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.tables.lock().unwrap().user_roles.insert((user_id, role_id)))
    }

    async fn revoke_role(&self, user_id: Uuid, role_id: Uuid) -> Result<bool, DatabaseError> {
        Ok(self.tables.lock().unwrap().user_roles.remove(&(user_id, role_id)))
    }

    async fn list_permissions(&self) -> Result<Vec<PermissionRecord>, DatabaseError> {
        let mut permissions = self.tables.lock().unwrap().permissions.clone();
        permissions.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(permissions)
    }

    async fn permission_codes_for_user(&self, user_id: Uuid) -> Result<Vec<String>, DatabaseError> {
        let t = self.tables.lock().unwrap();
        let role_ids: HashSet<Uuid> = t
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, r)| *r)
            .collect();
        let mut codes: Vec<String> = t
            .permissions
            .iter()
            .filter(|p| role_ids.iter().any(|r| t.role_permissions.contains(&(*r, p.id))))
            .map(|p| p.code.clone())
            .collect();
        codes.sort();
        Ok(codes)
    }

    async fn ensure_role(&self, name: &str, description: &str) -> Result<Uuid, DatabaseError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(role) = t.roles.iter().find(|r| r.name == name) {
            return Ok(role.id);
        }
        let id = Uuid::new_v4();
        t.roles.push(RoleRecord {
            id,
            name: name.to_string(),
            description: description.to_string(),
        });
        Ok(id)
    }

    async fn ensure_permission(&self, code: &str, description: &str) -> Result<Uuid, DatabaseError> {
        let mut t = self.tables.lock().unwrap();
        if let Some(p) = t.permissions.iter().find(|p| p.code == code) {
            return Ok(p.id);
        }
        let id = Uuid::new_v4();
        t.permissions.push(PermissionRecord {
            id,
            code: code.to_string(),
            description: description.to_string(),
        });
        Ok(id)
    }

    async fn grant_permission(&self, role_id: Uuid, permission_id: Uuid) -> Result<(), DatabaseError> {
        self.tables
            .lock()
            .unwrap()
            .role_permissions
            .insert((role_id, permission_id));
        Ok(())
    }
}

struct FakeState {
    sessions: Vec<RawSession>,
    tablespaces: Vec<RawTablespace>,
    sql: Vec<RawSqlStat>,
    instance: RawInstance,
    objects: Vec<RawObjectCount>,
    invalid: Vec<RawInvalidObject>,
    failure: Option<TargetError>,
    delay: Option<Duration>,
}

/// Scriptable target system.
pub struct FakeIntrospection {
    state: Mutex<FakeState>,
    calls: Arc<AtomicUsize>,
}

impl Default for FakeIntrospection {
    fn default() -> Self {
        let startup = NaiveDate::from_ymd_opt(2025, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        Self {
            state: Mutex::new(FakeState {
                sessions: Vec::new(),
                tablespaces: Vec::new(),
                sql: Vec::new(),
                instance: RawInstance {
                    instance_name: "ORCL".to_string(),
                    host_name: "db1".to_string(),
                    version: "19.0.0.0.0".to_string(),
                    startup_time: startup,
                    status: "OPEN".to_string(),
                    database_status: "ACTIVE".to_string(),
                    instance_role: "PRIMARY_INSTANCE".to_string(),
                    target_now: startup + chrono::Duration::days(10),
                    total_bytes: 0.0,
                },
                objects: Vec::new(),
                invalid: Vec::new(),
                failure: None,
                delay: None,
            }),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeIntrospection {
    pub fn set_sessions(&self, sessions: Vec<RawSession>) {
        self.state.lock().unwrap().sessions = sessions;
    }

    pub fn set_tablespaces(&self, tablespaces: Vec<RawTablespace>) {
        self.state.lock().unwrap().tablespaces = tablespaces;
    }

    pub fn fail_with(&self, error: TargetError) {
        self.state.lock().unwrap().failure = Some(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().unwrap().delay = Some(delay);
    }

    /// Number of introspection calls that reached the fake.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    async fn answer<T>(&self, pick: impl FnOnce(&FakeState) -> T) -> Result<T, TargetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        match &state.failure {
            Some(e) => Err(e.clone()),
            None => Ok(pick(&state)),
        }
    }
}

#[async_trait]
impl IntrospectionSource for FakeIntrospection {
    async fn sessions(&self, scope: SessionScope) -> Result<Vec<RawSession>, TargetError> {
        self.answer(|s| {
            s.sessions
                .iter()
                .filter(|raw| match &scope {
                    SessionScope::Active => raw.status == "ACTIVE",
                    SessionScope::All => true,
                    SessionScope::Schema(schema) => raw.schema_name.as_deref() == Some(schema.as_str()),
                })
                .cloned()
                .collect()
        })
        .await
    }

    async fn tablespaces(&self) -> Result<Vec<RawTablespace>, TargetError> {
        self.answer(|s| s.tablespaces.clone()).await
    }

    async fn sql_statistics(&self, _order: SqlOrder, limit: u32) -> Result<Vec<RawSqlStat>, TargetError> {
        self.answer(|s| s.sql.iter().take(limit as usize).cloned().collect()).await
    }

    async fn instance(&self) -> Result<RawInstance, TargetError> {
        self.answer(|s| s.instance.clone()).await
    }

    async fn object_inventory(&self) -> Result<Vec<RawObjectCount>, TargetError> {
        self.answer(|s| s.objects.clone()).await
    }

    async fn invalid_objects(&self) -> Result<Vec<RawInvalidObject>, TargetError> {
        self.answer(|s| s.invalid.clone()).await
    }

    async fn ping(&self) -> Result<(), TargetError> {
        self.answer(|_| ()).await
    }
}
