//! # API Request Models
//!
//! Structures for incoming API request bodies and query strings.
//! Each struct represents the expected JSON body or query for an endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{AuditFilter, AuditOutcome};
use crate::services::identity::{parse_id, NewUser};
use crate::services::ServiceError;
use crate::utils::parse_timestamp;

/// Credentials for `POST /auth/login`.
///
/// ## Example JSON
///
/// ```json
/// {
///     "username": "dba1",
///     "password": "correct horse battery"
/// }
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Request to create an operator identity.
///
/// ## Example JSON
///
/// ```json
/// {
///     "username": "dev1",
///     "email": "dev1@example.com",
///     "password": "at-least-8-chars",
///     "roleIds": ["6f1c3c6e-8f0e-4a57-9a43-5d4c0e6f7a11"]
/// }
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,

    /// Roles to assign on creation. May be empty.
    #[serde(default)]
    pub role_ids: Vec<String>,
}

impl CreateUserRequest {
    /// Parse role ids; a malformed id is a validation error.
    pub fn into_new_user(self) -> Result<NewUser, ServiceError> {
        let role_ids = self
            .role_ids
            .iter()
            .map(|raw| parse_id("role", raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(NewUser {
            username: self.username,
            email: self.email,
            password: self.password,
            role_ids,
        })
    }
}

/// Body for `PUT /users/{id}/active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub active: bool,
}

/// Query for `GET /sessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    /// Restrict to sessions whose current schema matches.
    pub schema: Option<String>,
}

/// Query for the top-SQL endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSqlQuery {
    /// Clamped to 1..=100. Default: 10
    pub limit: Option<u32>,
}

/// Query for `GET /audit` and `GET /audit/count`.
///
/// Timestamps are RFC 3339. Every field is optional; set fields are
/// combined with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub actor_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub outcome: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQuery {
    pub fn into_filter(self) -> Result<AuditFilter, ServiceError> {
        let actor_id = self
            .actor_id
            .as_deref()
            .map(|raw| parse_id("actor", raw))
            .transpose()?;
        let outcome = self
            .outcome
            .as_deref()
            .map(|raw| raw.to_ascii_uppercase().parse::<AuditOutcome>())
            .transpose()
            .map_err(ServiceError::Validation)?;

        Ok(AuditFilter {
            actor_id,
            action: self.action,
            resource_type: self.resource_type,
            outcome,
            start: optional_timestamp(self.start.as_deref())?,
            end: optional_timestamp(self.end.as_deref())?,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// Query for `GET /metrics/{type}/{target}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRangeQuery {
    pub start: String,
    pub end: String,
}

impl MetricRangeQuery {
    pub fn bounds(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), ServiceError> {
        let start = parse_timestamp(&self.start).map_err(ServiceError::Validation)?;
        let end = parse_timestamp(&self.end).map_err(ServiceError::Validation)?;
        Ok((start, end))
    }
}

fn optional_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ServiceError> {
    raw.map(parse_timestamp)
        .transpose()
        .map_err(ServiceError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_audit_query_parses_filters() {
        let actor = Uuid::new_v4();
        let query = AuditQuery {
            actor_id: Some(actor.to_string()),
            outcome: Some("denied".to_string()),
            start: Some("2025-01-01T00:00:00Z".to_string()),
            limit: Some(5),
            ..Default::default()
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.actor_id, Some(actor));
        assert_eq!(filter.outcome, Some(AuditOutcome::Denied));
        assert!(filter.start.is_some());
        assert!(filter.end.is_none());
        assert_eq!(filter.limit, Some(5));
    }

    #[test]
    fn test_audit_query_rejects_bad_input() {
        let bad_actor = AuditQuery { actor_id: Some("nope".into()), ..Default::default() };
        assert!(matches!(bad_actor.into_filter(), Err(ServiceError::Validation(_))));

        let bad_outcome = AuditQuery { outcome: Some("ALLOWED".into()), ..Default::default() };
        assert!(matches!(bad_outcome.into_filter(), Err(ServiceError::Validation(_))));

        let bad_time = AuditQuery { end: Some("yesterday".into()), ..Default::default() };
        assert!(matches!(bad_time.into_filter(), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_create_user_rejects_malformed_role_id() {
        let request = CreateUserRequest {
            username: "dev1".into(),
            email: "dev1@example.com".into(),
            password: "long-enough".into(),
            role_ids: vec!["not-a-uuid".into()],
        };
        assert!(matches!(request.into_new_user(), Err(ServiceError::Validation(_))));
    }
}
