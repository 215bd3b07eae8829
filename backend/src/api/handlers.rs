//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data (and the caller, via [`Authenticated`])
//! 2. Calls the appropriate service
//! 3. Returns a formatted response
//!
//! Permission checks and auditing live in the services, not here.
//!
//! ## Error Handling
//!
//! All errors are caught and returned as JSON:
//!
//! ```json
//! {
//!     "success": false,
//!     "error": {
//!         "code": "TARGET_TIMEOUT",
//!         "message": "target query exceeded 30s deadline"
//!     }
//! }
//! ```

use std::sync::Arc;

use actix_web::{web, HttpResponse, ResponseError};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use super::auth::Authenticated;
use crate::models::{
    ApiResponse, AuditQuery, CountResponse, CreateUserRequest, HealthResponse, LoginRequest,
    MetricRangeQuery, RoleChangeResponse, SessionQuery, SetActiveRequest, TopSqlQuery,
};
use crate::services::identity::parse_id;
use crate::services::{MetricType, Permission, ServiceError};
use crate::AppState;

/// Wrap a service result in the response envelope.
fn respond<T: Serialize>(operation: &str, result: Result<T, ServiceError>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::success(data)),
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("{} failed: {}", operation, e);
            } else {
                warn!("{} rejected: {}", operation, e);
            }
            e.error_response()
        }
    }
}

/// API information endpoint (root).
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "Oracle DBA Monitoring API",
        "version": env!("CARGO_PKG_VERSION"),
        "auth": "POST /auth/login, then send Authorization: Bearer <token>",
        "endpoints": [
            "GET /health",
            "GET /auth/me",
            "GET /sessions[?schema=NAME]",
            "GET /sessions/active",
            "GET /sessions/summary",
            "GET /locks/blocking",
            "GET /tablespaces",
            "GET /sql/top-elapsed[?limit=N]",
            "GET /sql/top-cpu[?limit=N]",
            "GET /instance",
            "GET /schemas",
            "GET /schemas/invalid-objects",
            "GET /audit",
            "GET /audit/count",
            "GET /metrics/{type}/{target}/latest",
            "GET /metrics/{type}/{target}?start=..&end=..",
            "GET|POST /users",
            "PUT /users/{id}/active",
            "POST|DELETE /users/{id}/roles/{roleId}",
            "GET /roles",
            "GET /permissions"
        ]
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// `GET /health`
///
/// ## Example
///
/// ```bash
/// curl http://127.0.0.1:8080/health
/// ```
///
/// Returns 503 when either the platform store or the target is down.
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let (database, target) = tokio::join!(state.db.health(), state.monitoring.ping());
    let healthy = database && target;

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        database,
        target,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if healthy {
        actix_web::http::StatusCode::OK
    } else {
        actix_web::http::StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

// ==========================================
// AUTH
// ==========================================

/// `POST /auth/login`
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/auth/login \
///   -H "Content-Type: application/json" \
///   -d '{"username": "dba1", "password": "..."}'
/// ```
pub async fn login(state: web::Data<Arc<AppState>>, body: web::Json<LoginRequest>) -> HttpResponse {
    info!("Login attempt for {}", body.username);
    respond("login", state.identity.login(&body.username, &body.password).await)
}

/// `GET /auth/me`
pub async fn me(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    respond("me", state.identity.me(auth.claims()).await)
}

// ==========================================
// MONITORING
// ==========================================

/// `GET /sessions`, or one schema's sessions with `?schema=NAME`.
pub async fn list_sessions(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    query: web::Query<SessionQuery>,
) -> HttpResponse {
    let caller = auth.caller();
    let schema = query.into_inner().schema;
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move {
            match schema {
                Some(schema) => m.sessions_by_schema(&caller, &schema, &cancel).await,
                None => m.all_sessions(&caller, &cancel).await,
            }
        })
        .await;
    respond("list sessions", result)
}

/// `GET /sessions/active`
pub async fn active_sessions(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    let caller = auth.caller();
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.active_sessions(&caller, &cancel).await })
        .await;
    respond("active sessions", result)
}

/// `GET /sessions/summary`
pub async fn session_summary(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    let caller = auth.caller();
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.session_summary(&caller, &cancel).await })
        .await;
    respond("session summary", result)
}

/// `GET /locks/blocking`
pub async fn blocking_sessions(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    let caller = auth.caller();
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.blocking_sessions(&caller, &cancel).await })
        .await;
    respond("blocking sessions", result)
}

/// `GET /tablespaces`
pub async fn tablespaces(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    let caller = auth.caller();
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.tablespaces(&caller, &cancel).await })
        .await;
    respond("tablespaces", result)
}

/// `GET /sql/top-elapsed?limit=N`
pub async fn top_sql_by_elapsed(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    query: web::Query<TopSqlQuery>,
) -> HttpResponse {
    let caller = auth.caller();
    let limit = query.limit;
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.top_sql_by_elapsed(&caller, limit, &cancel).await })
        .await;
    respond("top sql by elapsed", result)
}

/// `GET /sql/top-cpu?limit=N`
pub async fn top_sql_by_cpu(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    query: web::Query<TopSqlQuery>,
) -> HttpResponse {
    let caller = auth.caller();
    let limit = query.limit;
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.top_sql_by_cpu(&caller, limit, &cancel).await })
        .await;
    respond("top sql by cpu", result)
}

/// `GET /instance`
pub async fn database_instance(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    let caller = auth.caller();
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.database_instance(&caller, &cancel).await })
        .await;
    respond("database instance", result)
}

/// `GET /schemas`
pub async fn schemas(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    let caller = auth.caller();
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.schemas(&caller, &cancel).await })
        .await;
    respond("schemas", result)
}

/// `GET /schemas/invalid-objects`
pub async fn invalid_objects(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    let caller = auth.caller();
    let result = state
        .monitoring
        .request_scoped(|m, cancel| async move { m.invalid_objects(&caller, &cancel).await })
        .await;
    respond("invalid objects", result)
}

// ==========================================
// AUDIT
// ==========================================

/// `GET /audit?actorId=&action=&resourceType=&outcome=&start=&end=&limit=&offset=`
pub async fn audit_entries(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    query: web::Query<AuditQuery>,
) -> HttpResponse {
    let result = async {
        state.guard.require(Some(auth.claims()), Permission::AuditRead).await?;
        let filter = query.into_inner().into_filter()?;
        state.audit.list(&filter).await
    }
    .await;
    respond("audit list", result)
}

/// `GET /audit/count`. Same filters as `/audit`; paging is ignored.
pub async fn audit_count(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    query: web::Query<AuditQuery>,
) -> HttpResponse {
    let result: Result<CountResponse, ServiceError> = async {
        state.guard.require(Some(auth.claims()), Permission::AuditRead).await?;
        let filter = query.into_inner().into_filter()?;
        let count = state.audit.count(&filter).await?;
        Ok(CountResponse { count })
    }
    .await;
    respond("audit count", result)
}

// ==========================================
// METRIC HISTORY
// ==========================================

/// `GET /metrics/{type}/{target}/latest`
pub async fn latest_metric(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (metric_type, target) = path.into_inner();
    let result = async {
        let metric_type: MetricType = metric_type.parse()?;
        state.snapshots.latest(auth.claims(), metric_type, &target).await
    }
    .await;
    respond("latest metric", result)
}

/// `GET /metrics/{type}/{target}?start=..&end=..` (RFC 3339, inclusive)
pub async fn metric_history(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    path: web::Path<(String, String)>,
    query: web::Query<MetricRangeQuery>,
) -> HttpResponse {
    let (metric_type, target) = path.into_inner();
    let result = async {
        let metric_type: MetricType = metric_type.parse()?;
        let (start, end) = query.bounds()?;
        state
            .snapshots
            .range(auth.claims(), metric_type, &target, start, end)
            .await
    }
    .await;
    respond("metric history", result)
}

// ==========================================
// IDENTITY ADMINISTRATION
// ==========================================

/// `GET /users`
pub async fn list_users(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    respond("list users", state.identity.list_users(auth.claims()).await)
}

/// `POST /users`
pub async fn create_user(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    body: web::Json<CreateUserRequest>,
) -> HttpResponse {
    let result = async {
        let new_user = body.into_inner().into_new_user()?;
        state.identity.create_user(auth.claims(), new_user).await
    }
    .await;

    match result {
        Ok(user) => {
            info!("Created user {} ({})", user.username, user.id);
            HttpResponse::Created().json(ApiResponse::success(user))
        }
        Err(e) => respond::<()>("create user", Err(e)),
    }
}

/// `PUT /users/{id}/active` with `{"active": false}`
pub async fn set_user_active(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    path: web::Path<String>,
    body: web::Json<SetActiveRequest>,
) -> HttpResponse {
    let result: Result<serde_json::Value, ServiceError> = async {
        let user_id = parse_id("user", &path)?;
        state
            .identity
            .set_active(auth.claims(), user_id, body.active)
            .await?;
        Ok(json!({ "userId": user_id, "active": body.active }))
    }
    .await;
    respond("set user active", result)
}

/// `POST /users/{id}/roles/{roleId}`
pub async fn assign_role(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let result: Result<RoleChangeResponse, ServiceError> = async {
        let user_id = parse_id("user", &path.0)?;
        let role_id = parse_id("role", &path.1)?;
        let changed = state.identity.assign_role(auth.claims(), user_id, role_id).await?;
        Ok(RoleChangeResponse { changed })
    }
    .await;
    respond("assign role", result)
}

/// `DELETE /users/{id}/roles/{roleId}`
pub async fn revoke_role(
    state: web::Data<Arc<AppState>>,
    auth: Authenticated,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let result: Result<RoleChangeResponse, ServiceError> = async {
        let user_id = parse_id("user", &path.0)?;
        let role_id = parse_id("role", &path.1)?;
        let changed = state.identity.revoke_role(auth.claims(), user_id, role_id).await?;
        Ok(RoleChangeResponse { changed })
    }
    .await;
    respond("revoke role", result)
}

/// `GET /roles`
pub async fn list_roles(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    respond("list roles", state.identity.list_roles(auth.claims()).await)
}

/// `GET /permissions`
pub async fn list_permissions(state: web::Data<Arc<AppState>>, auth: Authenticated) -> HttpResponse {
    respond("list permissions", state.identity.list_permissions(auth.claims()).await)
}
