//! # Snapshot Recorder
//!
//! Persists periodic, immutable metric snapshots and serves them back
//! for trend queries.
//!
//! ## Metric Types
//!
//! | Type | Target | Payload | Read permission |
//! |------|--------|---------|-----------------|
//! | `TABLESPACE_USAGE` | tablespace name | `TablespaceRecord` | `VIEW_TABLESPACES` |
//! | `SESSION_SUMMARY` | instance name | `SessionSummary` | `VIEW_SESSIONS` |
//! | `TOP_SQL_ELAPSED` | instance name | `[QueryStat]` | `VIEW_SQL` |
//!
//! ## Recording Flow
//!
//! ```text
//! SnapshotRecorder (background task)
//!              │
//!              └── Every SNAPSHOT_INTERVAL_SECS:
//!                    ├── instance name
//!                    ├── one TABLESPACE_USAGE per tablespace
//!                    ├── SESSION_SUMMARY
//!                    └── TOP_SQL_ELAPSED
//! ```
//!
//! `collected_at` is strictly increasing per (type, target); the store
//! assigns it under a per-key lock.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::stores::SnapshotStore;
use crate::db::{AuditOutcome, MetricSnapshot, NewAuditEntry};
use crate::services::audit::AuditSink;
use crate::services::authorization::AuthorizationGuard;
use crate::services::error::ServiceError;
use crate::services::monitoring::{Caller, MonitoringCollector};
use crate::services::permissions::Permission;
use crate::services::token_service::Claims;

/// Actor name used for background collection.
pub const RECORDER_ACTOR: &str = "snapshot-recorder";

const RESOURCE_SNAPSHOT: &str = "METRIC_SNAPSHOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    TablespaceUsage,
    SessionSummary,
    TopSqlElapsed,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [
        MetricType::TablespaceUsage,
        MetricType::SessionSummary,
        MetricType::TopSqlElapsed,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            MetricType::TablespaceUsage => "TABLESPACE_USAGE",
            MetricType::SessionSummary => "SESSION_SUMMARY",
            MetricType::TopSqlElapsed => "TOP_SQL_ELAPSED",
        }
    }

    /// Permission that guards both the live metric and its history.
    pub fn permission(&self) -> Permission {
        match self {
            MetricType::TablespaceUsage => Permission::ViewTablespaces,
            MetricType::SessionSummary => Permission::ViewSessions,
            MetricType::TopSqlElapsed => Permission::ViewSql,
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for MetricType {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        MetricType::ALL
            .iter()
            .copied()
            .find(|m| m.code() == upper)
            .ok_or_else(|| ServiceError::Validation(format!("unknown metric type: {}", s)))
    }
}

#[derive(Clone)]
pub struct SnapshotRecorder {
    store: Arc<dyn SnapshotStore>,
    collector: MonitoringCollector,
    guard: AuthorizationGuard,
    audit: AuditSink,
}

impl SnapshotRecorder {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        collector: MonitoringCollector,
        guard: AuthorizationGuard,
        audit: AuditSink,
    ) -> Self {
        Self { store, collector, guard, audit }
    }

    /// Append one snapshot.
    pub async fn record(
        &self,
        metric_type: MetricType,
        target: &str,
        payload: serde_json::Value,
    ) -> Result<MetricSnapshot, ServiceError> {
        let target = validate_target(target)?;
        let snapshot = self.store.append(metric_type.code(), target, &payload).await?;
        debug!(
            "Recorded {} snapshot for {} at {}",
            metric_type, target, snapshot.collected_at
        );
        Ok(snapshot)
    }

    /// Most recent snapshot for the key, if any.
    pub async fn latest(
        &self,
        claims: &Claims,
        metric_type: MetricType,
        target: &str,
    ) -> Result<Option<MetricSnapshot>, ServiceError> {
        let target = validate_target(target)?;
        self.guard.require(Some(claims), metric_type.permission()).await?;

        let latest = self.store.latest(metric_type.code(), target).await?;
        self.audit_read(claims, "GET_METRIC_LATEST", metric_type, target, latest.iter().count())
            .await;
        Ok(latest)
    }

    /// Snapshots with `start <= collected_at <= end`, oldest first.
    pub async fn range(
        &self,
        claims: &Claims,
        metric_type: MetricType,
        target: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MetricSnapshot>, ServiceError> {
        let target = validate_target(target)?;
        if start > end {
            return Err(ServiceError::Validation("start must not be after end".into()));
        }
        self.guard.require(Some(claims), metric_type.permission()).await?;

        let snapshots = self.store.range(metric_type.code(), target, start, end).await?;
        self.audit_read(claims, "GET_METRIC_HISTORY", metric_type, target, snapshots.len())
            .await;
        Ok(snapshots)
    }

    async fn audit_read(
        &self,
        claims: &Claims,
        action: &str,
        metric_type: MetricType,
        target: &str,
        count: usize,
    ) {
        self.audit
            .record(
                NewAuditEntry::new(
                    claims.user_id().ok(),
                    &claims.username,
                    action,
                    RESOURCE_SNAPSHOT,
                    AuditOutcome::Success,
                )
                .with_resource_id(format!("{}:{}", metric_type, target))
                .with_error(format!("count:{}", count)),
            )
            .await;
    }

    /// Collect every metric once and record it.
    ///
    /// Returns the number of snapshots written. A failing metric is
    /// logged and does not stop the others.
    pub async fn collect_once(&self, cancel: &CancellationToken) -> usize {
        let caller = Caller::System(RECORDER_ACTOR);
        let mut written = 0;

        let instance_name = match self.collector.database_instance(&caller, cancel).await {
            Ok(instance) => instance.instance_name,
            Err(e) => {
                error!("Snapshot cycle skipped, instance unavailable: {}", e);
                return 0;
            }
        };

        match self.collector.tablespaces(&caller, cancel).await {
            Ok(tablespaces) => {
                for ts in tablespaces {
                    written += self
                        .record_value(MetricType::TablespaceUsage, &ts.name, &ts)
                        .await;
                }
            }
            Err(e) => warn!("Tablespace snapshot failed: {}", e),
        }

        match self.collector.session_summary(&caller, cancel).await {
            Ok(summary) => {
                written += self
                    .record_value(MetricType::SessionSummary, &instance_name, &summary)
                    .await;
            }
            Err(e) => warn!("Session summary snapshot failed: {}", e),
        }

        match self.collector.top_sql_by_elapsed(&caller, None, cancel).await {
            Ok(stats) => {
                written += self
                    .record_value(MetricType::TopSqlElapsed, &instance_name, &stats)
                    .await;
            }
            Err(e) => warn!("Top SQL snapshot failed: {}", e),
        }

        written
    }

    async fn record_value<T: serde::Serialize>(
        &self,
        metric_type: MetricType,
        target: &str,
        value: &T,
    ) -> usize {
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot encode {} snapshot for {}: {}", metric_type, target, e);
                return 0;
            }
        };
        match self.record(metric_type, target, payload).await {
            Ok(_) => 1,
            Err(e) => {
                error!("Failed to record {} snapshot for {}: {}", metric_type, target, e);
                0
            }
        }
    }

    /// Run the collection loop until `shutdown` fires.
    ///
    /// ## Usage
    ///
    /// ```rust,ignore
    /// let recorder = state.snapshots.clone();
    /// tokio::spawn(async move {
    ///     recorder.start(Duration::from_secs(300), shutdown).await;
    /// });
    /// ```
    pub async fn start(&self, every: Duration, shutdown: CancellationToken) {
        if every.is_zero() {
            info!("Snapshot recorder disabled");
            return;
        }
        info!("Starting snapshot recorder (every {:?})", every);

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Snapshot recorder stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let cycle = shutdown.child_token();
                    let written = self.collect_once(&cycle).await;
                    info!("Snapshot cycle wrote {} snapshots", written);
                }
            }
        }
    }
}

fn validate_target(target: &str) -> Result<&str, ServiceError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ServiceError::Validation("snapshot target must not be empty".into()));
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::RawTablespace;
    use crate::services::permissions::DefaultRole;
    use crate::testing::{claims_with, FakeIntrospection, MemoryAuditStore, MemorySnapshotStore};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn recorder(source: FakeIntrospection) -> (SnapshotRecorder, Arc<MemoryAuditStore>) {
        let audit_store = Arc::new(MemoryAuditStore::default());
        let audit = AuditSink::new(audit_store.clone());
        let guard = AuthorizationGuard::new(audit.clone());
        let collector = MonitoringCollector::new(
            Arc::new(source),
            guard.clone(),
            audit.clone(),
            std::time::Duration::from_secs(1),
        );
        let recorder = SnapshotRecorder::new(
            Arc::new(MemorySnapshotStore::default()),
            collector,
            guard,
            audit,
        );
        (recorder, audit_store)
    }

    fn dba() -> Claims {
        claims_with("dba1", &["DBA"], DefaultRole::Dba.permissions())
    }

    #[test]
    fn test_metric_type_parsing() {
        assert_eq!("tablespace_usage".parse::<MetricType>().unwrap(), MetricType::TablespaceUsage);
        assert_eq!("TOP_SQL_ELAPSED".parse::<MetricType>().unwrap(), MetricType::TopSqlElapsed);
        assert!(matches!("CPU".parse::<MetricType>(), Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_collected_at_strictly_increases() {
        let (recorder, _) = recorder(FakeIntrospection::default());
        let mut previous: Option<DateTime<Utc>> = None;
        for i in 0..20 {
            let snap = recorder
                .record(MetricType::TablespaceUsage, "USERS", json!({ "i": i }))
                .await
                .unwrap();
            if let Some(prev) = previous {
                assert!(snap.collected_at > prev);
            }
            previous = Some(snap.collected_at);
        }
    }

    #[tokio::test]
    async fn test_latest_and_inclusive_range() {
        let (recorder, _) = recorder(FakeIntrospection::default());
        let claims = dba();

        assert!(recorder
            .latest(&claims, MetricType::TablespaceUsage, "USERS")
            .await
            .unwrap()
            .is_none());

        let first = recorder.record(MetricType::TablespaceUsage, "USERS", json!({"pct": 90})).await.unwrap();
        let _other = recorder.record(MetricType::TablespaceUsage, "SYSAUX", json!({"pct": 10})).await.unwrap();
        let second = recorder.record(MetricType::TablespaceUsage, "USERS", json!({"pct": 91})).await.unwrap();

        let latest = recorder
            .latest(&claims, MetricType::TablespaceUsage, "USERS")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.payload, json!({"pct": 91}));

        let range = recorder
            .range(&claims, MetricType::TablespaceUsage, "USERS", first.collected_at, second.collected_at)
            .await
            .unwrap();
        let payloads: Vec<_> = range.iter().map(|s| s.payload.clone()).collect();
        assert_eq!(payloads, vec![json!({"pct": 90}), json!({"pct": 91})]);

        let empty = recorder
            .range(
                &claims,
                MetricType::TablespaceUsage,
                "USERS",
                second.collected_at + ChronoDuration::seconds(1),
                second.collected_at + ChronoDuration::seconds(2),
            )
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_range_rejects_inverted_window() {
        let (recorder, _) = recorder(FakeIntrospection::default());
        let now = Utc::now();
        let err = recorder
            .range(&dba(), MetricType::SessionSummary, "ORCL", now, now - ChronoDuration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_history_guarded_by_live_permission() {
        let (recorder, audit) = recorder(FakeIntrospection::default());
        let read_only = claims_with("ro", &["READ_ONLY"], DefaultRole::ReadOnly.permissions());

        assert!(recorder.latest(&read_only, MetricType::TablespaceUsage, "USERS").await.is_ok());
        let err = recorder
            .latest(&read_only, MetricType::TopSqlElapsed, "ORCL")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Authorization { .. }));

        let denied: Vec<_> = audit
            .entries()
            .into_iter()
            .filter(|e| e.outcome == AuditOutcome::Denied)
            .collect();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].resource_id.as_deref(), Some("VIEW_SQL"));
    }

    #[tokio::test]
    async fn test_collect_once_records_each_metric() {
        let source = FakeIntrospection::default();
        source.set_tablespaces(vec![
            RawTablespace {
                name: "USERS".into(),
                total_bytes: 100.0 * 1024.0 * 1024.0,
                free_bytes: 25.0 * 1024.0 * 1024.0,
                status: "ONLINE".into(),
                contents: "PERMANENT".into(),
                datafile_count: 1,
            },
            RawTablespace {
                name: "SYSAUX".into(),
                total_bytes: 10.0 * 1024.0 * 1024.0,
                free_bytes: 0.0,
                status: "ONLINE".into(),
                contents: "PERMANENT".into(),
                datafile_count: 1,
            },
        ]);
        let (recorder, _) = recorder(source);

        let written = recorder.collect_once(&CancellationToken::new()).await;
        assert_eq!(written, 4);

        let claims = dba();
        let users = recorder
            .latest(&claims, MetricType::TablespaceUsage, "USERS")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(users.payload["usagePercentage"], json!(75.0));
        assert!(recorder
            .latest(&claims, MetricType::SessionSummary, "ORCL")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_zero_interval_disables_loop() {
        let (recorder, _) = recorder(FakeIntrospection::default());
        // Returns immediately instead of looping.
        recorder
            .start(std::time::Duration::ZERO, CancellationToken::new())
            .await;
    }
}
