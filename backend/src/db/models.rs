//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//! Each struct represents a row in a table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `auth.users` | Operator identities (argon2 password hashes) |
//! | `auth.roles` | Named roles (ADMIN, DBA, ...) |
//! | `auth.permissions` | Permission codes |
//! | `auth.role_permissions` | Role → permission grants |
//! | `auth.user_roles` | Identity → role assignments |
//! | `audit.entries` | Append-only audit trail |
//! | `monitoring.metric_snapshots` | Append-only metric history |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ auth.users  │────<│auth.user_roles│>────│ auth.roles  │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!                                                 │
//!                                                 ▼
//!                     ┌──────────────────┐  ┌───────────────────┐
//!                     │auth.permissions  │─<│auth.role_permissions│
//!                     └──────────────────┘  └───────────────────┘
//! ```
//!
//! Join tables are explicit rows; roles and identities never hold
//! references to each other.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An operator identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub id: Uuid,

    /// Globally unique login name.
    pub username: String,

    /// Globally unique email address.
    pub email: String,

    /// PHC-formatted argon2 hash. Never serialized.
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// Soft-delete flag. Inactive identities cannot log in.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,

    pub last_login_at: Option<DateTime<Utc>>,
}

/// A named role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

/// A permission row from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub id: Uuid,
    pub code: String,
    pub description: String,
}

/// Outcome of a guarded action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "SUCCESS",
            AuditOutcome::Denied => "DENIED",
            AuditOutcome::Failure => "FAILURE",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(AuditOutcome::Success),
            "DENIED" => Ok(AuditOutcome::Denied),
            "FAILURE" => Ok(AuditOutcome::Failure),
            other => Err(format!("unknown audit outcome: {}", other)),
        }
    }
}

/// A stored audit entry. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: Uuid,

    /// `None` for anonymous failures (bad token, unknown username).
    pub actor_id: Option<Uuid>,

    pub actor_name: String,

    /// Action code, e.g. `LOGIN`, `GET_TABLESPACES`, `ACCESS_DENIED`.
    pub action: String,

    /// Resource type, e.g. `AUTH`, `PERMISSION`, `ORACLE_QUERY`.
    pub resource_type: String,

    pub resource_id: Option<String>,

    pub outcome: AuditOutcome,

    pub error_detail: Option<String>,

    pub occurred_at: DateTime<Utc>,
}

/// An audit entry before the sink assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor_id: Option<Uuid>,
    pub actor_name: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub error_detail: Option<String>,
}

impl NewAuditEntry {
    pub fn new(
        actor_id: Option<Uuid>,
        actor_name: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            actor_id,
            actor_name: actor_name.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            outcome,
            error_detail: None,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// Stamp the entry with an id and timestamp.
    pub fn into_entry(self, occurred_at: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            id: Uuid::new_v4(),
            actor_id: self.actor_id,
            actor_name: self.actor_name,
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            outcome: self.outcome,
            error_detail: self.error_detail,
            occurred_at,
        }
    }
}

/// Conjunctive audit filter. Unset fields do not constrain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub outcome: Option<AuditOutcome>,

    /// Inclusive lower bound.
    pub start: Option<DateTime<Utc>>,

    /// Inclusive upper bound.
    pub end: Option<DateTime<Utc>>,

    /// Ignored by `count`.
    pub limit: Option<i64>,

    /// Ignored by `count`.
    pub offset: Option<i64>,
}

impl AuditFilter {
    /// Whether an entry satisfies every set field.
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(actor_id) = self.actor_id {
            if entry.actor_id != Some(actor_id) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(resource_type) = &self.resource_type {
            if &entry.resource_type != resource_type {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if entry.outcome != outcome {
                return false;
            }
        }
        if let Some(start) = self.start {
            if entry.occurred_at < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if entry.occurred_at > end {
                return false;
            }
        }
        true
    }
}

/// One immutable metric snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub id: Uuid,
    pub metric_type: String,
    pub target: String,

    /// Strictly increasing per (metric_type, target).
    pub collected_at: DateTime<Utc>,

    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(actor: Option<Uuid>, action: &str, at: DateTime<Utc>) -> AuditEntry {
        NewAuditEntry::new(actor, "someone", action, "ORACLE_QUERY", AuditOutcome::Success)
            .into_entry(at)
    }

    #[test]
    fn test_outcome_round_trips_through_str() {
        for outcome in [AuditOutcome::Success, AuditOutcome::Denied, AuditOutcome::Failure] {
            assert_eq!(outcome.as_str().parse::<AuditOutcome>().unwrap(), outcome);
        }
        assert!("ALLOWED".parse::<AuditOutcome>().is_err());
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let e = entry(None, "LOGIN", Utc::now());
        assert!(AuditFilter::default().matches(&e));
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let actor = Uuid::new_v4();
        let now = Utc::now();
        let e = entry(Some(actor), "GET_SCHEMAS", now);

        let filter = AuditFilter {
            actor_id: Some(actor),
            action: Some("GET_SCHEMAS".to_string()),
            start: Some(now - Duration::hours(1)),
            end: Some(now),
            ..Default::default()
        };
        assert!(filter.matches(&e));

        let wrong_action = AuditFilter {
            action: Some("LOGIN".to_string()),
            ..filter.clone()
        };
        assert!(!wrong_action.matches(&e));

        let anonymous = entry(None, "GET_SCHEMAS", now);
        assert!(!filter.matches(&anonymous));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let identity = IdentityRecord {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "$argon2id$v=19$secret".to_string(),
            is_active: true,
            created_at: Utc::now(),
            last_login_at: None,
        };
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"isActive\":true"));
    }
}
