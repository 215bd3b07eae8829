//! # Oracle DBA Monitoring Backend
//!
//! This is the main entry point for the backend service that lets
//! operators watch an Oracle database without direct database access.
//! It provides:
//!
//! - REST API for live introspection (sessions, locks, tablespaces, SQL)
//! - Bearer-token authentication with role-based permissions
//! - An append-only audit trail of every guarded action
//! - A background recorder that keeps metric history for trends
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌─────────────┐  ┌─────────────────────────────────────────┐   │
//! │  │  REST API   │  │         Background Services             │   │
//! │  │  (Actix)    │  │  • Snapshot Recorder                    │   │
//! │  │             │  │                                         │   │
//! │  │  /auth      │  │                                         │   │
//! │  │  /sessions  │  │                                         │   │
//! │  │  /audit     │  │                                         │   │
//! │  └─────────────┘  └─────────────────────────────────────────┘   │
//! │         │                          │                             │
//! │  ┌──────┴──────────────────────────┴────────────────────────┐   │
//! │  │                    SERVICE LAYER                          │   │
//! │  │  ┌──────────┐ ┌─────────────┐ ┌──────────┐ ┌──────────┐  │   │
//! │  │  │ Identity │ │ Monitoring  │ │  Guard   │ │  Audit   │  │   │
//! │  │  └──────────┘ └─────────────┘ └──────────┘ └──────────┘  │   │
//! │  └───────────────────────────────────────────────────────────┘   │
//! │                          │                                       │
//! │         ┌────────────────┴────────────────┐                     │
//! │         │                                 │                      │
//! │  ┌──────┴──────┐                   ┌──────┴──────┐              │
//! │  │  PostgreSQL │                   │   Oracle    │              │
//! │  │ (platform)  │                   │  (target)   │              │
//! │  └─────────────┘                   └─────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Copy `.env.example` to `.env` and configure
//! 3. Start the server: `cargo run` (the schema migrates itself)
//!
//! ## Environment Variables
//!
//! See `.env.example` for all required configuration.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod models;
mod oracle;
mod services;
#[cfg(test)]
mod testing;
mod utils;

use config::{AppConfig, LogFormat};
use db::stores::{AuditStore, IdentityStore, SnapshotStore};
use db::Database;
use oracle::{IntrospectionSource, OracleClient};
use services::permissions::seed_catalog;
use services::{
    AuditSink, AuthorizationGuard, IdentityService, MonitoringCollector, SnapshotRecorder,
    TokenService,
};

/// Application state shared across all handlers.
///
/// Every service is cheap to clone; they share their stores and pools
/// through `Arc`s internally.
pub struct AppState {
    /// Platform store (health checks only; services use the store traits)
    pub db: Database,

    /// Issues and validates bearer tokens
    pub tokens: TokenService,

    /// Permission checks for handlers that guard directly
    pub guard: AuthorizationGuard,

    /// Audit trail reads and anonymous-failure writes
    pub audit: AuditSink,

    pub identity: IdentityService,

    pub monitoring: MonitoringCollector,

    /// Metric history reads
    pub snapshots: SnapshotRecorder,
}

/// Set up the global tracing subscriber.
///
/// `RUST_LOG` wins over `LOG_LEVEL` when both are set.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Loads configuration from environment
/// 2. Initializes the platform database and permission catalog
/// 3. Connects to the target database
/// 4. Starts the snapshot recorder
/// 5. Launches the HTTP server
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Load Configuration and Logging
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env().expect("Failed to load configuration");
    init_tracing(&config);

    info!("🚀 Starting Oracle DBA Monitoring Backend");
    info!("📋 Configuration loaded: {:?}", config);

    // =========================================
    // STEP 2: Initialize Platform Database
    // =========================================
    let db = Database::connect(
        &config.database_url,
        config.database_max_conns,
        config.database_pool_timeout,
    )
    .await
    .expect("Failed to connect to database");

    info!("🗄️  Database connected");

    db.run_migrations()
        .await
        .expect("Failed to run migrations");

    info!("📦 Database migrations complete");

    seed_catalog(&db)
        .await
        .expect("Permission catalog is incomplete");

    info!("🔐 Permission catalog seeded");

    // =========================================
    // STEP 3: Initialize Services
    // =========================================
    let audit_store: Arc<dyn AuditStore> = Arc::new(db.clone());
    let identity_store: Arc<dyn IdentityStore> = Arc::new(db.clone());
    let snapshot_store: Arc<dyn SnapshotStore> = Arc::new(db.clone());

    let tokens = TokenService::new(&config.jwt_secret, config.jwt_expiration, &config.jwt_issuer)
        .expect("Invalid token configuration");
    let audit = AuditSink::new(audit_store);
    let guard = AuthorizationGuard::new(audit.clone());
    let identity = IdentityService::new(identity_store, tokens.clone(), guard.clone(), audit.clone());

    if let Some(admin) = &config.bootstrap_admin {
        identity
            .bootstrap_admin(admin)
            .await
            .expect("Failed to bootstrap admin account");
    }

    // =========================================
    // STEP 4: Connect to the Target Database
    // =========================================
    let oracle = OracleClient::connect(&config)
        .await
        .expect("Failed to connect to Oracle");
    let source: Arc<dyn IntrospectionSource> = Arc::new(oracle);

    info!("🛢️  Oracle pool ready");

    let monitoring = MonitoringCollector::new(
        source,
        guard.clone(),
        audit.clone(),
        config.oracle_query_timeout,
    );
    let snapshots = SnapshotRecorder::new(snapshot_store, monitoring.clone(), guard.clone(), audit.clone());

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start Background Services
    // =========================================
    let shutdown = CancellationToken::new();

    let recorder = snapshots.clone();
    let recorder_shutdown = shutdown.clone();
    let interval = config.snapshot_interval;
    tokio::spawn(async move {
        recorder.start(interval, recorder_shutdown).await;
    });

    info!("📊 Snapshot recorder started");

    let app_state = Arc::new(AppState {
        db,
        tokens,
        guard,
        audit,
        identity,
        monitoring,
        snapshots,
    });

    // =========================================
    // STEP 6: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    let result = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))

            .wrap(cors)

            // Add logging middleware
            .wrap(middleware::Logger::default())

            // Configure API routes
            .configure(api::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await;

    shutdown.cancel();
    if let Err(e) = &result {
        error!("HTTP server stopped with error: {}", e);
    }
    info!("👋 Shutdown complete");
    result
}
