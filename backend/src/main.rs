//! Main entry point for the authentication backend.
//!
//! This file initializes tracing, configuration and the database, wires the
//! stores and collaborators into the session manager, and serves the Axum
//! router until ctrl-c.

mod api;
mod auth;
mod config;
mod database;
mod errors;
mod middleware;
mod repositories;
mod services;
mod utils;

use crate::api::AppState;
use crate::api::common::ApiResponse;
use crate::auth::service::SessionManager;
use crate::config::StoreBackend;
use crate::middleware::{RateLimiter, with_security_headers};
use crate::repositories::{
    AuditStore, CredentialStore, InMemoryAuditStore, InMemoryCredentialStore, InMemoryTokenStore,
    SqliteAuditStore, SqliteCredentialStore, SqliteTokenStore, TokenStore,
};
use crate::services::{EmailSender, EmailService, LogEmailSender};
use crate::utils::crypto::SecretSealer;
use crate::utils::jwt::JwtUtils;
use crate::utils::password::PasswordHasher;
use anyhow::{Context, Result};
use axum::{Extension, Router, response::Json, routing::get};
use config::Config;
use database::Database;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let sealer = SecretSealer::from_base64_key(&config.otp_encryption_key)
        .context("OTP_ENCRYPTION_KEY must be a base64 encoded 32-byte key")?;

    let mut db = None;
    let (credentials, tokens, audit): (
        Arc<dyn CredentialStore>,
        Arc<dyn TokenStore>,
        Arc<dyn AuditStore>,
    ) = match config.store_backend {
        StoreBackend::Sqlite => {
            let database = Database::new(&config).await?;
            let pool = database.pool().clone();
            db = Some(database);
            (
                Arc::new(SqliteCredentialStore::new(pool.clone(), sealer)) as Arc<dyn CredentialStore>,
                Arc::new(SqliteTokenStore::new(pool.clone())) as Arc<dyn TokenStore>,
                Arc::new(SqliteAuditStore::new(pool)) as Arc<dyn AuditStore>,
            )
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory stores; all users and sessions are lost on exit");
            (
                Arc::new(InMemoryCredentialStore::new()) as Arc<dyn CredentialStore>,
                Arc::new(InMemoryTokenStore::new()) as Arc<dyn TokenStore>,
                Arc::new(InMemoryAuditStore::new()) as Arc<dyn AuditStore>,
            )
        }
    };

    let mailer: Arc<dyn EmailSender> = match config.email_config() {
        Some(email_config) => Arc::new(EmailService::new(email_config)?),
        None => {
            tracing::warn!("SMTP is not configured; password reset emails will not be delivered");
            Arc::new(LogEmailSender)
        }
    };

    let settings = config.auth_settings();
    let sessions = SessionManager::new(
        credentials,
        tokens,
        mailer,
        JwtUtils::new(&config.jwt_secret, settings.access_token_ttl),
        PasswordHasher::new(config.bcrypt_cost)?,
        settings,
    );

    if let Some(admin) = &config.bootstrap_admin {
        if sessions
            .ensure_admin(&admin.username, &admin.email, &admin.password)
            .await?
        {
            info!("Seeded administrator {}", admin.username);
        }
    }

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_settings()));
    let sweeper = limiter.spawn_sweeper();

    let app = Router::new()
        .route("/", get(root_handler))
        .nest("/auth", auth::routes::auth_router())
        .layer(Extension(AppState::new(sessions, limiter, audit)))
        .layer(TraceLayer::new_for_http());
    let app = with_security_headers(app);

    let bind_address = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;

    info!("Starting auth server on port {}", config.server_port);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    sweeper.shutdown();
    if let Some(db) = db {
        db.close().await;
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn root_handler() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(
        serde_json::json!({
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }),
        "Auth service is running",
    ))
}
