//! # REST API Module
//!
//! This module defines all HTTP endpoints for the DBA monitoring API.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Permission |
//! |--------|------|------------|
//! | POST | `/auth/login` | none |
//! | GET | `/auth/me` | any valid token |
//! | GET | `/sessions`, `/sessions/active`, `/sessions/summary` | `VIEW_SESSIONS` |
//! | GET | `/locks/blocking` | `VIEW_LOCKS` |
//! | GET | `/tablespaces` | `VIEW_TABLESPACES` |
//! | GET | `/sql/top-elapsed`, `/sql/top-cpu` | `VIEW_SQL` |
//! | GET | `/instance` | any valid token |
//! | GET | `/schemas`, `/schemas/invalid-objects` | `VIEW_SCHEMA` |
//! | GET | `/audit`, `/audit/count` | `AUDIT_READ` |
//! | GET | `/metrics/{type}/{target}[/latest]` | permission of the live metric |
//! | GET, POST, PUT | `/users...` | `MANAGE_USERS` |
//! | POST, DELETE | `/users/{id}/roles/{roleId}` | `MANAGE_ROLES` |
//! | GET | `/roles`, `/permissions` | any valid token |
//! | GET | `/health` | none |
//!
//! ## Request/Response Format
//!
//! All requests and responses use JSON:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod auth;
pub mod handlers;
pub mod routes;

pub use routes::configure_routes;
