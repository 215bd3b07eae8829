//! # Monitoring Collector
//!
//! Runs the read-only introspection catalog on behalf of a caller and
//! normalizes raw rows into typed records.
//!
//! ## Call Flow
//!
//! ```text
//! caller ──► guard.require(permission)          (DENIED audited by guard)
//!        ──► select! { cancel, timeout(fetch) } (target query)
//!        ──► normalize raw rows
//!        ──► audit SUCCESS "count:N"  |  FAILURE <error> / "cancelled"
//! ```
//!
//! Failures are not retried. Nothing is cached; every call re-queries
//! the target.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::db::{AuditOutcome, NewAuditEntry};
use crate::oracle::{
    IntrospectionSource, RawInstance, RawInvalidObject, RawObjectCount, RawSession, RawSqlStat,
    RawTablespace, SessionScope, SqlOrder, TargetError,
};
use crate::services::audit::AuditSink;
use crate::services::authorization::AuthorizationGuard;
use crate::services::blocking::{self, BlockingRelationship};
use crate::services::error::ServiceError;
use crate::services::permissions::Permission;
use crate::services::token_service::Claims;
use crate::utils::{bytes_to_mb, micros_to_secs, round2, round4, truncate_string};

/// Oracle-maintained schemas left out of inventory views.
pub const SYSTEM_SCHEMAS: [&str; 9] = [
    "SYS", "SYSTEM", "OUTLN", "DBSNMP", "WMSYS", "XDB", "CTXSYS", "MDSYS", "ORDSYS",
];

pub const DEFAULT_TOP_SQL_LIMIT: u32 = 10;
pub const MAX_TOP_SQL_LIMIT: u32 = 100;

const RESOURCE_ORACLE: &str = "ORACLE_QUERY";
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Who a collector call runs for.
#[derive(Debug, Clone)]
pub enum Caller {
    /// An authenticated operator.
    User(Claims),
    /// An internal actor (e.g. the snapshot recorder); not permission-checked.
    System(&'static str),
}

impl Caller {
    fn actor(&self) -> (Option<Uuid>, String) {
        match self {
            Caller::User(claims) => (claims.user_id().ok(), claims.username.clone()),
            Caller::System(name) => (None, (*name).to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub sid: i64,
    pub serial: i64,
    pub username: Option<String>,
    pub schema_name: Option<String>,
    pub os_user: Option<String>,
    pub machine: Option<String>,
    pub program: Option<String>,
    pub status: String,
    pub sql_id: Option<String>,
    pub sql_text: Option<String>,
    pub logon_time: Option<NaiveDateTime>,
    pub last_call_elapsed_seconds: i64,
    pub blocking_session: Option<i64>,
    pub wait_class: Option<String>,
    pub event: Option<String>,
    pub seconds_in_wait: Option<i64>,
}

impl From<RawSession> for SessionRecord {
    fn from(raw: RawSession) -> Self {
        Self {
            sid: raw.sid,
            serial: raw.serial,
            username: raw.username,
            schema_name: raw.schema_name,
            os_user: raw.os_user,
            machine: raw.machine,
            program: raw.program,
            status: raw.status,
            sql_id: raw.sql_id,
            sql_text: raw.sql_text,
            logon_time: raw.logon_time,
            last_call_elapsed_seconds: raw.last_call_et.max(0),
            blocking_session: raw.blocking_session,
            wait_class: raw.wait_class,
            event: raw.event,
            seconds_in_wait: raw.seconds_in_wait,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSessionCount {
    pub schema_name: String,
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub inactive_sessions: usize,
    pub blocked_sessions: usize,
    /// Ordered by schema name.
    pub by_schema: Vec<SchemaSessionCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TablespaceRecord {
    pub name: String,
    pub total_size_mb: f64,
    pub used_size_mb: f64,
    pub free_size_mb: f64,
    pub usage_percentage: f64,
    pub status: String,
    pub contents: String,
    pub datafile_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryStat {
    pub sql_id: String,
    pub sql_text: Option<String>,
    pub parsing_schema: Option<String>,
    pub executions: i64,
    pub elapsed_time_seconds: f64,
    pub avg_elapsed_seconds: f64,
    pub cpu_time_seconds: f64,
    pub avg_cpu_seconds: f64,
    pub disk_reads: i64,
    pub buffer_gets: i64,
    pub rows_processed: i64,
    pub first_load_time: Option<String>,
    pub last_active_time: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseInstance {
    pub instance_name: String,
    pub host_name: String,
    pub version: String,
    pub startup_time: NaiveDateTime,
    pub status: String,
    pub database_status: String,
    pub instance_role: String,
    pub uptime_days: f64,
    pub total_size_gb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchemaInfo {
    pub schema_name: String,
    pub total_objects: i64,
    pub table_count: i64,
    pub index_count: i64,
    pub view_count: i64,
    pub procedure_count: i64,
    pub function_count: i64,
    pub package_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvalidObject {
    pub schema_name: String,
    pub object_name: String,
    pub object_type: String,
    pub status: String,
    pub last_ddl_time: Option<NaiveDateTime>,
    pub created: Option<NaiveDateTime>,
}

/// Row count reported in the SUCCESS audit entry.
trait RowCount {
    fn row_count(&self) -> usize;
}

impl<T> RowCount for Vec<T> {
    fn row_count(&self) -> usize {
        self.len()
    }
}

impl RowCount for DatabaseInstance {
    fn row_count(&self) -> usize {
        1
    }
}

impl RowCount for SessionSummary {
    fn row_count(&self) -> usize {
        self.total_sessions
    }
}

/// One collector operation: who needs what, under which action code.
struct Operation<'a> {
    caller: &'a Caller,
    permission: Option<Permission>,
    action: &'static str,
    resource_id: Option<String>,
    cancel: &'a CancellationToken,
}

#[derive(Clone)]
pub struct MonitoringCollector {
    source: Arc<dyn IntrospectionSource>,
    guard: AuthorizationGuard,
    audit: AuditSink,
    query_timeout: Duration,
}

impl MonitoringCollector {
    pub fn new(
        source: Arc<dyn IntrospectionSource>,
        guard: AuthorizationGuard,
        audit: AuditSink,
        query_timeout: Duration,
    ) -> Self {
        Self { source, guard, audit, query_timeout }
    }

    pub async fn active_sessions(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<Vec<SessionRecord>, ServiceError> {
        let op = Operation {
            caller,
            permission: Some(Permission::ViewSessions),
            action: "GET_ACTIVE_SESSIONS",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.sessions(SessionScope::Active), |raw| {
            normalize_sessions(raw, SessionOrder::LastCall)
        })
        .await
    }

    pub async fn all_sessions(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<Vec<SessionRecord>, ServiceError> {
        let op = Operation {
            caller,
            permission: Some(Permission::ViewSessions),
            action: "GET_ALL_SESSIONS",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.sessions(SessionScope::All), |raw| {
            normalize_sessions(raw, SessionOrder::Logon)
        })
        .await
    }

    pub async fn sessions_by_schema(
        &self,
        caller: &Caller,
        schema: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SessionRecord>, ServiceError> {
        let schema = schema.trim().to_uppercase();
        if schema.is_empty() {
            return Err(ServiceError::Validation("schema name must not be empty".into()));
        }
        let op = Operation {
            caller,
            permission: Some(Permission::ViewSessions),
            action: "GET_SESSIONS_BY_SCHEMA",
            resource_id: Some(schema.clone()),
            cancel,
        };
        self.collect(op, self.source.sessions(SessionScope::Schema(schema)), |raw| {
            normalize_sessions(raw, SessionOrder::LastCall)
        })
        .await
    }

    pub async fn session_summary(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<SessionSummary, ServiceError> {
        let op = Operation {
            caller,
            permission: Some(Permission::ViewSessions),
            action: "GET_SESSION_SUMMARY",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.sessions(SessionScope::All), |raw| summarize_sessions(&raw))
            .await
    }

    /// All user sessions run through the blocking-chain analyzer.
    pub async fn blocking_sessions(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockingRelationship>, ServiceError> {
        let op = Operation {
            caller,
            permission: Some(Permission::ViewLocks),
            action: "GET_BLOCKING_SESSIONS",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.sessions(SessionScope::All), |raw| blocking::analyze(&raw))
            .await
    }

    pub async fn tablespaces(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<Vec<TablespaceRecord>, ServiceError> {
        let op = Operation {
            caller,
            permission: Some(Permission::ViewTablespaces),
            action: "GET_TABLESPACES",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.tablespaces(), normalize_tablespaces).await
    }

    pub async fn top_sql_by_elapsed(
        &self,
        caller: &Caller,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryStat>, ServiceError> {
        self.top_sql(caller, SqlOrder::Elapsed, limit, cancel).await
    }

    pub async fn top_sql_by_cpu(
        &self,
        caller: &Caller,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryStat>, ServiceError> {
        self.top_sql(caller, SqlOrder::Cpu, limit, cancel).await
    }

    async fn top_sql(
        &self,
        caller: &Caller,
        order: SqlOrder,
        limit: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueryStat>, ServiceError> {
        let limit = clamp_limit(limit);
        let action = match order {
            SqlOrder::Elapsed => "GET_TOP_SQL_BY_ELAPSED",
            SqlOrder::Cpu => "GET_TOP_SQL_BY_CPU",
        };
        let op = Operation {
            caller,
            permission: Some(Permission::ViewSql),
            action,
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.sql_statistics(order, limit), move |raw| {
            normalize_sql_stats(raw, order, limit)
        })
        .await
    }

    /// Instance metadata; any authenticated caller may read it.
    pub async fn database_instance(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<DatabaseInstance, ServiceError> {
        let op = Operation {
            caller,
            permission: None,
            action: "GET_DATABASE_INSTANCE",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.instance(), normalize_instance).await
    }

    pub async fn schemas(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<Vec<SchemaInfo>, ServiceError> {
        let op = Operation {
            caller,
            permission: Some(Permission::ViewSchema),
            action: "GET_SCHEMAS",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.object_inventory(), summarize_schemas).await
    }

    pub async fn invalid_objects(
        &self,
        caller: &Caller,
        cancel: &CancellationToken,
    ) -> Result<Vec<InvalidObject>, ServiceError> {
        let op = Operation {
            caller,
            permission: Some(Permission::ViewSchema),
            action: "GET_INVALID_OBJECTS",
            resource_id: None,
            cancel,
        };
        self.collect(op, self.source.invalid_objects(), normalize_invalid_objects).await
    }

    /// Run a collector call in its own task, tied to the caller's future.
    ///
    /// Dropping the returned future (a client disconnect) cancels the
    /// token; the task keeps running long enough to break off the target
    /// call and write its FAILURE `cancelled` entry.
    pub async fn request_scoped<T, F, Fut>(&self, call: F) -> Result<T, ServiceError>
    where
        F: FnOnce(MonitoringCollector, CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let _on_drop = cancel.clone().drop_guard();

        tokio::spawn(call(self.clone(), cancel))
            .await
            .map_err(|e| ServiceError::TargetSystem(TargetError::Query(format!("collector task failed: {}", e))))?
    }

    /// Target reachability for the health endpoint. Not audited.
    pub async fn ping(&self) -> bool {
        matches!(
            tokio::time::timeout(self.query_timeout, self.source.ping()).await,
            Ok(Ok(()))
        )
    }

    async fn collect<R, T, F, N>(
        &self,
        op: Operation<'_>,
        fetch: F,
        normalize: N,
    ) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<R, TargetError>> + Send,
        N: FnOnce(R) -> T,
        T: RowCount,
    {
        if let (Caller::User(claims), Some(permission)) = (op.caller, op.permission) {
            self.guard.require(Some(claims), permission).await?;
        }

        let deadline = self.query_timeout;
        let fetched = tokio::select! {
            biased;
            _ = op.cancel.cancelled() => Err(TargetError::Cancelled),
            result = tokio::time::timeout(deadline, fetch) => {
                result.unwrap_or(Err(TargetError::Timeout(deadline)))
            }
        };

        let (actor_id, actor_name) = op.caller.actor();
        let entry = |outcome| {
            let entry = NewAuditEntry::new(actor_id, &actor_name, op.action, RESOURCE_ORACLE, outcome);
            match &op.resource_id {
                Some(id) => entry.with_resource_id(id),
                None => entry,
            }
        };

        match fetched {
            Ok(raw) => {
                let records = normalize(raw);
                let count = records.row_count();
                debug!("{} returned {} rows for {}", op.action, count, actor_name);
                self.audit
                    .record(entry(AuditOutcome::Success).with_error(format!("count:{}", count)))
                    .await;
                Ok(records)
            }
            Err(e) => {
                error!(
                    "{} failed for {}: {}",
                    op.action,
                    actor_name,
                    truncate_string(&e.to_string(), 500)
                );
                self.audit
                    .record(entry(AuditOutcome::Failure).with_error(e.to_string()))
                    .await;
                Err(ServiceError::TargetSystem(e))
            }
        }
    }
}

/// Clamp a requested row limit to `1..=MAX_TOP_SQL_LIMIT`.
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_TOP_SQL_LIMIT).clamp(1, MAX_TOP_SQL_LIMIT)
}

#[derive(Clone, Copy)]
enum SessionOrder {
    /// Longest since last call first.
    LastCall,
    /// Most recent logon first.
    Logon,
}

fn normalize_sessions(raw: Vec<RawSession>, order: SessionOrder) -> Vec<SessionRecord> {
    let mut sessions: Vec<SessionRecord> = raw.into_iter().map(SessionRecord::from).collect();
    match order {
        SessionOrder::LastCall => sessions.sort_by(|a, b| {
            b.last_call_elapsed_seconds
                .cmp(&a.last_call_elapsed_seconds)
                .then(a.sid.cmp(&b.sid))
        }),
        SessionOrder::Logon => {
            sessions.sort_by(|a, b| b.logon_time.cmp(&a.logon_time).then(a.sid.cmp(&b.sid)))
        }
    }
    sessions
}

fn summarize_sessions(raw: &[RawSession]) -> SessionSummary {
    let mut by_schema: BTreeMap<String, SchemaSessionCount> = BTreeMap::new();
    let mut active = 0;
    let mut blocked = 0;

    for session in raw {
        let is_active = session.status == "ACTIVE";
        if is_active {
            active += 1;
        }
        if session.blocking_session.is_some() {
            blocked += 1;
        }
        if let Some(schema) = &session.schema_name {
            let counts = by_schema.entry(schema.clone()).or_insert_with(|| SchemaSessionCount {
                schema_name: schema.clone(),
                total: 0,
                active: 0,
                inactive: 0,
            });
            counts.total += 1;
            if is_active {
                counts.active += 1;
            } else {
                counts.inactive += 1;
            }
        }
    }

    SessionSummary {
        total_sessions: raw.len(),
        active_sessions: active,
        inactive_sessions: raw.len() - active,
        blocked_sessions: blocked,
        by_schema: by_schema.into_values().collect(),
    }
}

fn normalize_tablespace(raw: RawTablespace) -> TablespaceRecord {
    let total_bytes = raw.total_bytes.max(0.0);
    let free_bytes = raw.free_bytes.clamp(0.0, total_bytes);

    let total = bytes_to_mb(total_bytes);
    let free = bytes_to_mb(free_bytes);
    let used = round2(total - free);
    let usage = if total > 0.0 {
        round2((total - free) / total * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    TablespaceRecord {
        name: raw.name,
        total_size_mb: total,
        used_size_mb: used,
        free_size_mb: free,
        usage_percentage: usage,
        status: raw.status,
        contents: raw.contents,
        datafile_count: raw.datafile_count,
    }
}

fn normalize_tablespaces(raw: Vec<RawTablespace>) -> Vec<TablespaceRecord> {
    let mut records: Vec<TablespaceRecord> = raw.into_iter().map(normalize_tablespace).collect();
    records.sort_by(|a, b| {
        b.usage_percentage
            .total_cmp(&a.usage_percentage)
            .then_with(|| a.name.cmp(&b.name))
    });
    records
}

fn normalize_sql_stats(raw: Vec<RawSqlStat>, order: SqlOrder, limit: u32) -> Vec<QueryStat> {
    let mut eligible: Vec<RawSqlStat> = raw.into_iter().filter(|s| s.executions > 0).collect();
    eligible.sort_by(|a, b| {
        let (x, y) = match order {
            SqlOrder::Elapsed => (a.elapsed_micros, b.elapsed_micros),
            SqlOrder::Cpu => (a.cpu_micros, b.cpu_micros),
        };
        y.total_cmp(&x).then_with(|| a.sql_id.cmp(&b.sql_id))
    });
    eligible.truncate(limit as usize);

    eligible
        .into_iter()
        .map(|s| {
            let executions = s.executions as f64;
            let elapsed = micros_to_secs(s.elapsed_micros);
            let cpu = micros_to_secs(s.cpu_micros);
            QueryStat {
                sql_id: s.sql_id,
                sql_text: s.sql_text,
                parsing_schema: s.parsing_schema,
                executions: s.executions,
                elapsed_time_seconds: round2(elapsed),
                avg_elapsed_seconds: round4(elapsed / executions),
                cpu_time_seconds: round2(cpu),
                avg_cpu_seconds: round4(cpu / executions),
                disk_reads: s.disk_reads,
                buffer_gets: s.buffer_gets,
                rows_processed: s.rows_processed,
                first_load_time: s.first_load_time,
                last_active_time: s.last_active_time,
            }
        })
        .collect()
}

fn normalize_instance(raw: RawInstance) -> DatabaseInstance {
    let uptime_secs = (raw.target_now - raw.startup_time).num_seconds().max(0) as f64;
    DatabaseInstance {
        instance_name: raw.instance_name,
        host_name: raw.host_name,
        version: raw.version,
        startup_time: raw.startup_time,
        status: raw.status,
        database_status: raw.database_status,
        instance_role: raw.instance_role,
        uptime_days: round2(uptime_secs / 86_400.0),
        total_size_gb: round2(raw.total_bytes.max(0.0) / BYTES_PER_GB),
    }
}

fn is_system_schema(owner: &str) -> bool {
    SYSTEM_SCHEMAS.contains(&owner)
}

fn summarize_schemas(raw: Vec<RawObjectCount>) -> Vec<SchemaInfo> {
    let mut schemas: BTreeMap<String, SchemaInfo> = BTreeMap::new();
    for row in raw.into_iter().filter(|r| !is_system_schema(&r.owner)) {
        let info = schemas.entry(row.owner.clone()).or_insert_with(|| SchemaInfo {
            schema_name: row.owner.clone(),
            ..Default::default()
        });
        info.total_objects += row.count;
        match row.object_type.as_str() {
            "TABLE" => info.table_count += row.count,
            "INDEX" => info.index_count += row.count,
            "VIEW" => info.view_count += row.count,
            "PROCEDURE" => info.procedure_count += row.count,
            "FUNCTION" => info.function_count += row.count,
            "PACKAGE" => info.package_count += row.count,
            _ => {}
        }
    }

    let mut result: Vec<SchemaInfo> = schemas.into_values().collect();
    result.sort_by(|a, b| {
        b.total_objects
            .cmp(&a.total_objects)
            .then_with(|| a.schema_name.cmp(&b.schema_name))
    });
    result
}

fn normalize_invalid_objects(raw: Vec<RawInvalidObject>) -> Vec<InvalidObject> {
    let mut objects: Vec<InvalidObject> = raw
        .into_iter()
        .filter(|o| !is_system_schema(&o.owner))
        .map(|o| InvalidObject {
            schema_name: o.owner,
            object_name: o.object_name,
            object_type: o.object_type,
            status: o.status,
            last_ddl_time: o.last_ddl_time,
            created: o.created,
        })
        .collect();
    objects.sort_by(|a, b| {
        (&a.schema_name, &a.object_type, &a.object_name)
            .cmp(&(&b.schema_name, &b.object_type, &b.object_name))
    });
    objects
}
