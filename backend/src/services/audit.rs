//! # Audit Sink
//!
//! Append-only accountability trail for every guarded action.
//!
//! `record` is best-effort: a failed write is logged locally and never
//! fails the operation it accompanies. Reads are conjunctive filters
//! ordered newest first.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::db::stores::AuditStore;
use crate::db::{AuditEntry, AuditFilter, NewAuditEntry};
use crate::services::error::ServiceError;

/// Default and maximum page size for `list`.
pub const DEFAULT_PAGE: i64 = 100;
pub const MAX_PAGE: i64 = 1000;

#[derive(Clone)]
pub struct AuditSink {
    store: Arc<dyn AuditStore>,
}

impl AuditSink {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append one entry. Never fails.
    pub async fn record(&self, entry: NewAuditEntry) {
        let entry = entry.into_entry(Utc::now());
        debug!(
            "audit {} {} {} by {}",
            entry.action, entry.resource_type, entry.outcome, entry.actor_name
        );

        if let Err(e) = self.store.insert(&entry).await {
            warn!(
                action = %entry.action,
                actor = %entry.actor_name,
                outcome = %entry.outcome,
                "Audit write lost: {}",
                e
            );
        }
    }

    /// Matching entries, newest first. Page size is clamped to `1..=MAX_PAGE`.
    pub async fn list(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, ServiceError> {
        let filter = normalize_page(filter)?;
        Ok(self.store.list(&filter).await?)
    }

    pub async fn count(&self, filter: &AuditFilter) -> Result<i64, ServiceError> {
        validate_window(filter)?;
        Ok(self.store.count(filter).await?)
    }
}

fn validate_window(filter: &AuditFilter) -> Result<(), ServiceError> {
    if let (Some(start), Some(end)) = (filter.start, filter.end) {
        if start > end {
            return Err(ServiceError::Validation("start must not be after end".into()));
        }
    }
    Ok(())
}

fn normalize_page(filter: &AuditFilter) -> Result<AuditFilter, ServiceError> {
    validate_window(filter)?;
    if filter.offset.is_some_and(|o| o < 0) {
        return Err(ServiceError::Validation("offset must not be negative".into()));
    }
    let mut filter = filter.clone();
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE));
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AuditOutcome;
    use crate::testing::{FailingAuditStore, MemoryAuditStore};
    use chrono::Duration;
    use uuid::Uuid;

    fn new_entry(actor: Option<Uuid>, action: &str) -> NewAuditEntry {
        NewAuditEntry::new(actor, "alice", action, "ORACLE_QUERY", AuditOutcome::Success)
    }

    #[tokio::test]
    async fn test_record_swallows_store_failure() {
        let sink = AuditSink::new(Arc::new(FailingAuditStore));
        // Must return normally.
        sink.record(new_entry(None, "LOGIN")).await;
    }

    #[tokio::test]
    async fn test_list_filters_by_actor_and_window_newest_first() {
        let store = Arc::new(MemoryAuditStore::default());
        let sink = AuditSink::new(store.clone());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();

        store.push(new_entry(Some(alice), "GET_SCHEMAS").into_entry(now - Duration::hours(30)));
        store.push(new_entry(Some(alice), "GET_TABLESPACES").into_entry(now - Duration::hours(2)));
        store.push(new_entry(Some(bob), "GET_TABLESPACES").into_entry(now - Duration::hours(1)));
        store.push(new_entry(Some(alice), "GET_ALL_SESSIONS").into_entry(now - Duration::minutes(5)));

        let filter = AuditFilter {
            actor_id: Some(alice),
            start: Some(now - Duration::hours(24)),
            end: Some(now),
            ..Default::default()
        };
        let entries = sink.list(&filter).await.unwrap();
        let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["GET_ALL_SESSIONS", "GET_TABLESPACES"]);
        assert!(entries.iter().all(|e| e.actor_id == Some(alice)));

        assert_eq!(sink.count(&filter).await.unwrap(), 2);
        assert_eq!(sink.count(&AuditFilter::default()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_inverted_window_rejected() {
        let sink = AuditSink::new(Arc::new(MemoryAuditStore::default()));
        let now = Utc::now();
        let filter = AuditFilter {
            start: Some(now),
            end: Some(now - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(matches!(sink.list(&filter).await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_page_size_clamped() {
        let store = Arc::new(MemoryAuditStore::default());
        let sink = AuditSink::new(store.clone());
        for _ in 0..5 {
            sink.record(new_entry(None, "LOGIN")).await;
        }
        let filter = AuditFilter { limit: Some(0), ..Default::default() };
        assert_eq!(sink.list(&filter).await.unwrap().len(), 1);
        let filter = AuditFilter { limit: Some(3), offset: Some(3), ..Default::default() };
        assert_eq!(sink.list(&filter).await.unwrap().len(), 2);
    }
}
