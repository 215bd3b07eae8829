//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::web;

use super::handlers;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                          GET    (no token)
/// ├── /auth
/// │   ├── /login                       POST   (no token)
/// │   └── /me                          GET
/// ├── /sessions                        GET    ?schema=
/// │   ├── /active                      GET
/// │   └── /summary                     GET
/// ├── /locks/blocking                  GET
/// ├── /tablespaces                     GET
/// ├── /sql
/// │   ├── /top-elapsed                 GET    ?limit=
/// │   └── /top-cpu                     GET    ?limit=
/// ├── /instance                        GET
/// ├── /schemas                         GET
/// │   └── /invalid-objects             GET
/// ├── /audit                           GET
/// │   └── /count                       GET
/// ├── /metrics/{type}/{target}         GET    ?start=&end=
/// │   └── /latest                      GET
/// ├── /users                           GET, POST
/// │   ├── /{id}/active                 PUT
/// │   └── /{id}/roles/{roleId}         POST, DELETE
/// ├── /roles                           GET
/// └── /permissions                     GET
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))

        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))

        .service(
            web::scope("/auth")
                .route("/login", web::post().to(handlers::login))
                .route("/me", web::get().to(handlers::me)),
        )

        // Live introspection of the target database
        .service(
            web::scope("/sessions")
                .route("", web::get().to(handlers::list_sessions))
                .route("/active", web::get().to(handlers::active_sessions))
                .route("/summary", web::get().to(handlers::session_summary)),
        )
        .route("/locks/blocking", web::get().to(handlers::blocking_sessions))
        .route("/tablespaces", web::get().to(handlers::tablespaces))
        .service(
            web::scope("/sql")
                .route("/top-elapsed", web::get().to(handlers::top_sql_by_elapsed))
                .route("/top-cpu", web::get().to(handlers::top_sql_by_cpu)),
        )
        .route("/instance", web::get().to(handlers::database_instance))
        .service(
            web::scope("/schemas")
                .route("", web::get().to(handlers::schemas))
                .route("/invalid-objects", web::get().to(handlers::invalid_objects)),
        )

        // Audit trail
        .service(
            web::scope("/audit")
                .route("", web::get().to(handlers::audit_entries))
                .route("/count", web::get().to(handlers::audit_count)),
        )

        // Recorded metric history
        .service(
            web::scope("/metrics/{type}/{target}")
                .route("", web::get().to(handlers::metric_history))
                .route("/latest", web::get().to(handlers::latest_metric)),
        )

        // Identity administration
        .service(
            web::scope("/users")
                .route("", web::get().to(handlers::list_users))
                .route("", web::post().to(handlers::create_user))
                .route("/{id}/active", web::put().to(handlers::set_user_active))
                .route("/{id}/roles/{role_id}", web::post().to(handlers::assign_role))
                .route("/{id}/roles/{role_id}", web::delete().to(handlers::revoke_role)),
        )
        .route("/roles", web::get().to(handlers::list_roles))
        .route("/permissions", web::get().to(handlers::list_permissions));
}
