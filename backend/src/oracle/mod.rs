//! # Oracle Target Module
//!
//! Read-only access to the monitored Oracle instance.
//!
//! ## Responsibilities
//!
//! - Own the bounded target connection pool (min/max connections)
//! - Run the fixed introspection catalog in [`queries`]
//! - Map result rows into raw, un-normalized records
//! - Propagate the per-query deadline into the driver and break the
//!   in-flight call when the caller goes away
//!
//! ## Query Flow
//!
//! ```text
//! 1. Collector awaits OracleClient::tablespaces()
//!              ↓
//! 2. Pool slot acquired on the blocking pool (timed wait)
//!              ↓
//! 3. Call timeout set on the connection
//!              ↓
//! 4. Statement runs on a blocking thread; a BreakOnDrop guard is held
//!    by the awaiting future
//!              ↓
//! 5a. Completes → guard disarmed, rows mapped
//! 5b. Future dropped (cancel/timeout) → guard breaks the call
//! ```
//!
//! The driver is synchronous, so every call goes through
//! `tokio::task::spawn_blocking`. The collector consumes the
//! [`IntrospectionSource`] trait rather than this client directly.

pub mod queries;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use oracle::pool::{GetMode, Pool, PoolBuilder};
use oracle::{Connection, Row};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Failures talking to the target system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// No connection could be obtained (pool exhausted, listener down).
    #[error("target database unavailable: {0}")]
    Unavailable(String),

    /// The statement exceeded its deadline and was broken off.
    #[error("target query exceeded {0:?}")]
    Timeout(Duration),

    /// The statement failed or its rows could not be mapped.
    #[error("target query failed: {0}")]
    Query(String),

    /// The caller abandoned the request.
    #[error("cancelled")]
    Cancelled,
}

impl TargetError {
    fn classify(e: oracle::Error, deadline: Duration) -> Self {
        let message = e.to_string();
        if message.contains("DPI-1067") || message.contains("ORA-03156") {
            TargetError::Timeout(deadline)
        } else if message.contains("ORA-01013") {
            TargetError::Cancelled
        } else if message.contains("ORA-12541")
            || message.contains("ORA-12514")
            || message.contains("ORA-03113")
            || message.contains("ORA-03114")
            || message.contains("ORA-24459")
            || message.contains("DPI-1010")
            || message.contains("DPI-1080")
        {
            TargetError::Unavailable(message)
        } else {
            TargetError::Query(message)
        }
    }
}

/// Which sessions to return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionScope {
    /// `ACTIVE` user sessions only.
    Active,
    /// Every user session, including idle ones holding locks.
    All,
    /// User sessions whose current schema matches.
    Schema(String),
}

/// Ranking metric for cached statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOrder {
    Elapsed,
    Cpu,
}

/// One row of `v$session`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSession {
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
    pub last_call_et: i64,
    pub blocking_session: Option<i64>,
    pub wait_class: Option<String>,
    pub event: Option<String>,
    pub seconds_in_wait: Option<i64>,
}

/// Tablespace capacity in bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTablespace {
    pub name: String,
    pub total_bytes: f64,
    pub free_bytes: f64,
    pub status: String,
    pub contents: String,
    pub datafile_count: i64,
}

/// Cached statement counters; times are in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSqlStat {
    pub sql_id: String,
    pub sql_text: Option<String>,
    pub parsing_schema: Option<String>,
    pub executions: i64,
    pub elapsed_micros: f64,
    pub cpu_micros: f64,
    pub disk_reads: i64,
    pub buffer_gets: i64,
    pub rows_processed: i64,
    /// `YYYY-MM-DD/HH24:MI:SS`, as Oracle reports it.
    pub first_load_time: Option<String>,
    pub last_active_time: Option<NaiveDateTime>,
}

/// Instance identity plus the target's own clock.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstance {
    pub instance_name: String,
    pub host_name: String,
    pub version: String,
    pub startup_time: NaiveDateTime,
    pub status: String,
    pub database_status: String,
    pub instance_role: String,
    /// `SYSDATE` at query time.
    pub target_now: NaiveDateTime,
    /// Sum of datafile sizes.
    pub total_bytes: f64,
}

/// Object count for one (owner, object type).
#[derive(Debug, Clone, PartialEq)]
pub struct RawObjectCount {
    pub owner: String,
    pub object_type: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawInvalidObject {
    pub owner: String,
    pub object_name: String,
    pub object_type: String,
    pub status: String,
    pub last_ddl_time: Option<NaiveDateTime>,
    pub created: Option<NaiveDateTime>,
}

/// Read-only introspection capability over the target system.
#[async_trait]
pub trait IntrospectionSource: Send + Sync {
    async fn sessions(&self, scope: SessionScope) -> Result<Vec<RawSession>, TargetError>;

    async fn tablespaces(&self) -> Result<Vec<RawTablespace>, TargetError>;

    /// At most `limit` statements with `executions > 0`, ranked by `order`.
    async fn sql_statistics(&self, order: SqlOrder, limit: u32) -> Result<Vec<RawSqlStat>, TargetError>;

    async fn instance(&self) -> Result<RawInstance, TargetError>;

    async fn object_inventory(&self) -> Result<Vec<RawObjectCount>, TargetError>;

    async fn invalid_objects(&self) -> Result<Vec<RawInvalidObject>, TargetError>;

    async fn ping(&self) -> Result<(), TargetError>;
}

/// Breaks the in-flight call on its connection unless disarmed.
struct BreakOnDrop {
    conn: Option<Arc<Connection>>,
}

impl BreakOnDrop {
    fn new(conn: Arc<Connection>) -> Self {
        Self { conn: Some(conn) }
    }

    fn disarm(&mut self) {
        self.conn = None;
    }
}

impl Drop for BreakOnDrop {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("Breaking abandoned target call");
            if let Err(e) = conn.break_execution() {
                warn!("Failed to break target call: {}", e);
            }
        }
    }
}

/// Oracle connection pool wrapper.
///
/// ## Usage
///
/// ```rust,ignore
/// let config = AppConfig::from_env()?;
/// let client = OracleClient::connect(&config).await?;
///
/// let tablespaces = client.tablespaces().await?;
/// ```
#[derive(Clone)]
pub struct OracleClient {
    pool: Arc<Pool>,

    /// Driver-level call timeout applied to every statement.
    query_timeout: Duration,
}

impl OracleClient {
    /// Build the pool and verify connectivity.
    ///
    /// ## Errors
    ///
    /// * `TargetError::Unavailable` - pool creation or the first ping failed
    pub async fn connect(config: &AppConfig) -> Result<Self, TargetError> {
        let username = config.oracle_username.clone();
        let password = config.oracle_password.clone();
        let connect_string = config.oracle_connect_string();
        let min = config.oracle_min_conns;
        let max = config.oracle_max_conns;
        let wait = config.oracle_query_timeout;

        info!("Connecting to Oracle at {} as {}", connect_string, username);

        let pool = tokio::task::spawn_blocking(move || {
            PoolBuilder::new(username, password, connect_string)
                .min_connections(min)
                .max_connections(max)
                .get_mode(GetMode::TimedWait(wait))
                .build()
        })
        .await
        .map_err(|e| TargetError::Unavailable(e.to_string()))?
        .map_err(|e| TargetError::Unavailable(e.to_string()))?;

        let client = Self {
            pool: Arc::new(pool),
            query_timeout: config.oracle_query_timeout,
        };
        client.ping().await?;

        info!("Oracle pool ready ({}..={} connections)", min, max);
        Ok(client)
    }

    /// Run `work` on a pooled connection with the call timeout set.
    ///
    /// Dropping the returned future before completion breaks the call.
    async fn run<T, F>(&self, label: &'static str, work: F) -> Result<T, TargetError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, oracle::Error> + Send + 'static,
    {
        let deadline = self.query_timeout;
        let pool = Arc::clone(&self.pool);

        let conn = tokio::task::spawn_blocking(move || pool.get())
            .await
            .map_err(|e| TargetError::Unavailable(e.to_string()))?
            .map_err(|e| TargetError::Unavailable(e.to_string()))?;
        conn.set_call_timeout(Some(deadline))
            .map_err(|e| TargetError::classify(e, deadline))?;

        let conn = Arc::new(conn);
        let mut guard = BreakOnDrop::new(Arc::clone(&conn));

        debug!("Running target query {}", label);
        let worker = Arc::clone(&conn);
        let joined = tokio::task::spawn_blocking(move || work(&*worker)).await;
        guard.disarm();

        match joined {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => Err(TargetError::classify(e, deadline)),
            Err(e) => Err(TargetError::Query(format!("{} worker failed: {}", label, e))),
        }
    }
}

fn map_session(row: &Row) -> Result<RawSession, oracle::Error> {
    Ok(RawSession {
        sid: row.get(0)?,
        serial: row.get(1)?,
        username: row.get(2)?,
        schema_name: row.get(3)?,
        os_user: row.get(4)?,
        machine: row.get(5)?,
        program: row.get(6)?,
        status: row.get(7)?,
        sql_id: row.get(8)?,
        sql_text: row.get(9)?,
        logon_time: row.get(10)?,
        last_call_et: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
        blocking_session: row.get(12)?,
        wait_class: row.get(13)?,
        event: row.get(14)?,
        seconds_in_wait: row.get(15)?,
    })
}

fn map_sql_stat(row: &Row) -> Result<RawSqlStat, oracle::Error> {
    Ok(RawSqlStat {
        sql_id: row.get(0)?,
        sql_text: row.get(1)?,
        parsing_schema: row.get(2)?,
        executions: row.get(3)?,
        elapsed_micros: row.get(4)?,
        cpu_micros: row.get(5)?,
        disk_reads: row.get(6)?,
        buffer_gets: row.get(7)?,
        rows_processed: row.get(8)?,
        first_load_time: row.get(9)?,
        last_active_time: row.get(10)?,
    })
}

#[async_trait]
impl IntrospectionSource for OracleClient {
    async fn sessions(&self, scope: SessionScope) -> Result<Vec<RawSession>, TargetError> {
        self.run("sessions", move |conn| {
            let rows = match &scope {
                SessionScope::Active => conn.query(queries::ACTIVE_SESSIONS, &[])?,
                SessionScope::All => conn.query(queries::ALL_SESSIONS, &[])?,
                SessionScope::Schema(schema) => conn.query(queries::SESSIONS_BY_SCHEMA, &[schema])?,
            };
            rows.map(|row| map_session(&row?)).collect()
        })
        .await
    }

    async fn tablespaces(&self) -> Result<Vec<RawTablespace>, TargetError> {
        self.run("tablespaces", |conn| {
            conn.query(queries::TABLESPACES, &[])?
                .map(|row| {
                    let row = row?;
                    Ok(RawTablespace {
                        name: row.get(0)?,
                        total_bytes: row.get(1)?,
                        free_bytes: row.get(2)?,
                        status: row.get(3)?,
                        contents: row.get(4)?,
                        datafile_count: row.get(5)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn sql_statistics(&self, order: SqlOrder, limit: u32) -> Result<Vec<RawSqlStat>, TargetError> {
        let sql = match order {
            SqlOrder::Elapsed => queries::TOP_SQL_BY_ELAPSED,
            SqlOrder::Cpu => queries::TOP_SQL_BY_CPU,
        };
        self.run("sql_statistics", move |conn| {
            conn.query(sql, &[&limit])?
                .map(|row| map_sql_stat(&row?))
                .collect()
        })
        .await
    }

    async fn instance(&self) -> Result<RawInstance, TargetError> {
        self.run("instance", |conn| {
            let row = conn.query_row(queries::INSTANCE, &[])?;
            let total_bytes: f64 = conn.query_row_as(queries::DATABASE_SIZE, &[])?;
            Ok(RawInstance {
                instance_name: row.get(0)?,
                host_name: row.get(1)?,
                version: row.get(2)?,
                startup_time: row.get(3)?,
                status: row.get(4)?,
                database_status: row.get(5)?,
                instance_role: row.get(6)?,
                target_now: row.get(7)?,
                total_bytes,
            })
        })
        .await
    }

    async fn object_inventory(&self) -> Result<Vec<RawObjectCount>, TargetError> {
        self.run("object_inventory", |conn| {
            conn.query(queries::OBJECT_INVENTORY, &[])?
                .map(|row| {
                    let row = row?;
                    Ok(RawObjectCount {
                        owner: row.get(0)?,
                        object_type: row.get(1)?,
                        count: row.get(2)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn invalid_objects(&self) -> Result<Vec<RawInvalidObject>, TargetError> {
        self.run("invalid_objects", |conn| {
            conn.query(queries::INVALID_OBJECTS, &[])?
                .map(|row| {
                    let row = row?;
                    Ok(RawInvalidObject {
                        owner: row.get(0)?,
                        object_name: row.get(1)?,
                        object_type: row.get(2)?,
                        status: row.get(3)?,
                        last_ddl_time: row.get(4)?,
                        created: row.get(5)?,
                    })
                })
                .collect()
        })
        .await
    }

    async fn ping(&self) -> Result<(), TargetError> {
        self.run("ping", |conn| {
            conn.query_row(queries::PING, &[])?;
            Ok(())
        })
        .await
    }
}
