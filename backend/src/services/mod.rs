//! # Services Module
//!
//! This module contains the core business logic of the DBA platform.
//! Each service handles a specific concern; handlers only translate
//! HTTP to service calls and back.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `TokenService` | Signed, expiring bearer tokens |
//! | `AuthorizationGuard` | Permission checks, denial auditing |
//! | `AuditSink` | Best-effort append-only audit trail |
//! | `IdentityService` | Login, users, role assignment |
//! | `MonitoringCollector` | Read-only target introspection |
//! | `SnapshotRecorder` | Periodic metric history |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌────────────┐   ┌────────────────┐   ┌────────────────────┐   │
//! │  │  Identity  │   │  Monitoring    │◄──│  SnapshotRecorder  │   │
//! │  │  Service   │   │  Collector     │   │  (background loop) │   │
//! │  └─────┬──────┘   └───────┬────────┘   └─────────┬──────────┘   │
//! │        │                  │                      │              │
//! │        ▼                  ▼                      ▼              │
//! │  ┌────────────┐   ┌────────────────┐   ┌────────────────────┐   │
//! │  │   Token    │   │ Authorization  │──►│     AuditSink      │   │
//! │  │  Service   │   │     Guard      │   │                    │   │
//! │  └────────────┘   └────────────────┘   └────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod authorization;
pub mod blocking;
pub mod error;
pub mod identity;
pub mod monitoring;
pub mod permissions;
pub mod snapshot_recorder;
pub mod token_service;

pub use audit::AuditSink;
pub use authorization::AuthorizationGuard;
pub use error::{AuthFailure, ServiceError};
pub use identity::IdentityService;
pub use monitoring::{Caller, MonitoringCollector};
pub use permissions::Permission;
pub use snapshot_recorder::{MetricType, SnapshotRecorder};
pub use token_service::{Claims, TokenService};
