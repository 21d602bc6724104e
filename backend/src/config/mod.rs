//! Central module for application-wide configuration settings.
//!
//! This module handles loading and managing configuration parameters such as
//! the database URL, signing secret, token lifetimes, rate-limit policy and
//! the optional SMTP relay used for password-reset mail.

use anyhow::{Context, Result, bail};
use chrono::Duration;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub jwt_secret: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub otp_challenge_ttl_seconds: i64,
    pub otp_step_up: bool,
    pub otp_issuer: String,
    pub otp_encryption_key: String,
    pub bcrypt_cost: u32,
    pub store_timeout_ms: u64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_idle_seconds: u64,
    pub rate_limit_sweep_seconds: u64,
    pub app_base_url: String,
    pub server_port: u16,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from_email: Option<String>,
    pub smtp_from_name: String,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

/// Where credentials and refresh tokens live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    /// Process-local maps; everything is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Administrator seeded at startup when all three values are set.
#[derive(Debug, Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// SMTP relay settings, present only when the relay is fully configured.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
}

/// Policy knobs consumed by the session manager.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub reset_token_ttl: Duration,
    pub otp_challenge_ttl: Duration,
    pub otp_step_up: bool,
    pub otp_issuer: String,
    pub store_timeout: std::time::Duration,
    pub reset_url_base: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(7),
            reset_token_ttl: Duration::minutes(15),
            otp_challenge_ttl: Duration::minutes(5),
            otp_step_up: true,
            otp_issuer: "RBAC-Auth".to_string(),
            store_timeout: std::time::Duration::from_secs(2),
            reset_url_base: "http://localhost:5173".to_string(),
        }
    }
}

/// Per-IP throttling policy.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window: std::time::Duration,
    pub idle_eviction: std::time::Duration,
    pub sweep_interval: std::time::Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: std::time::Duration::from_secs(10),
            idle_eviction: std::time::Duration::from_secs(300),
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: &str) -> Result<T> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<T>()
        .map_err(|_| anyhow::anyhow!("{key} must be a valid value"))
}

fn bootstrap_admin() -> Option<BootstrapAdmin> {
    Some(BootstrapAdmin {
        username: env::var("BOOTSTRAP_ADMIN_USERNAME").ok()?,
        email: env::var("BOOTSTRAP_ADMIN_EMAIL").ok()?,
        password: env::var("BOOTSTRAP_ADMIN_PASSWORD").ok()?,
    })
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let store_backend = parse_or::<StoreBackend>("STORE_BACKEND", "sqlite")?;
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://auth.db?mode=rwc".to_string());

        let max_connections = parse_or::<u32>("DB_MAX_CONNECTIONS", "5")?;
        let acquire_timeout_seconds = parse_or::<u64>("DB_ACQUIRE_TIMEOUT_SECONDS", "3")?;

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET not set")?;
        if jwt_secret.len() < 32 {
            bail!("JWT_SECRET must be at least 32 bytes");
        }

        let access_token_ttl_seconds = parse_or::<i64>("ACCESS_TOKEN_TTL_SECONDS", "900")?;
        let refresh_token_ttl_seconds = parse_or::<i64>("REFRESH_TOKEN_TTL_SECONDS", "604800")?;
        let reset_token_ttl_seconds = parse_or::<i64>("RESET_TOKEN_TTL_SECONDS", "900")?;
        let otp_challenge_ttl_seconds = parse_or::<i64>("OTP_CHALLENGE_TTL_SECONDS", "300")?;
        let otp_step_up = parse_or::<bool>("OTP_STEP_UP", "true")?;
        let otp_issuer = env::var("OTP_ISSUER").unwrap_or_else(|_| "RBAC-Auth".to_string());
        let otp_encryption_key =
            env::var("OTP_ENCRYPTION_KEY").context("OTP_ENCRYPTION_KEY not set")?;

        let bcrypt_cost = parse_or::<u32>("BCRYPT_COST", "12")?;
        let store_timeout_ms = parse_or::<u64>("STORE_TIMEOUT_MS", "2000")?;

        let rate_limit_max_requests = parse_or::<u32>("RATE_LIMIT_MAX_REQUESTS", "5")?;
        let rate_limit_window_seconds = parse_or::<u64>("RATE_LIMIT_WINDOW_SECONDS", "10")?;
        let rate_limit_idle_seconds = parse_or::<u64>("RATE_LIMIT_IDLE_SECONDS", "300")?;
        let rate_limit_sweep_seconds = parse_or::<u64>("RATE_LIMIT_SWEEP_SECONDS", "60")?;

        let app_base_url =
            env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .context("SERVER_PORT must be a valid number")?;

        let smtp_port = parse_or::<u16>("SMTP_PORT", "587")?;

        Ok(Config {
            store_backend,
            database_url,
            max_connections,
            acquire_timeout_seconds,
            jwt_secret,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            reset_token_ttl_seconds,
            otp_challenge_ttl_seconds,
            otp_step_up,
            otp_issuer,
            otp_encryption_key,
            bcrypt_cost,
            store_timeout_ms,
            rate_limit_max_requests,
            rate_limit_window_seconds,
            rate_limit_idle_seconds,
            rate_limit_sweep_seconds,
            app_base_url,
            server_port,
            smtp_host: env::var("SMTP_HOST").ok(),
            smtp_port,
            smtp_username: env::var("SMTP_USERNAME").ok(),
            smtp_password: env::var("SMTP_PASSWORD").ok(),
            smtp_from_email: env::var("SMTP_FROM_EMAIL").ok(),
            smtp_from_name: env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "Support".to_string()),
            bootstrap_admin: bootstrap_admin(),
        })
    }

    /// Returns the SMTP configuration when every required field is set.
    pub fn email_config(&self) -> Option<EmailConfig> {
        Some(EmailConfig {
            smtp_host: self.smtp_host.clone()?,
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username.clone()?,
            smtp_password: self.smtp_password.clone()?,
            from_email: self.smtp_from_email.clone()?,
            from_name: self.smtp_from_name.clone(),
        })
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            access_token_ttl: Duration::seconds(self.access_token_ttl_seconds),
            refresh_token_ttl: Duration::seconds(self.refresh_token_ttl_seconds),
            reset_token_ttl: Duration::seconds(self.reset_token_ttl_seconds),
            otp_challenge_ttl: Duration::seconds(self.otp_challenge_ttl_seconds),
            otp_step_up: self.otp_step_up,
            otp_issuer: self.otp_issuer.clone(),
            store_timeout: std::time::Duration::from_millis(self.store_timeout_ms),
            reset_url_base: self.app_base_url.clone(),
        }
    }

    pub fn rate_limit_settings(&self) -> RateLimitSettings {
        RateLimitSettings {
            max_requests: self.rate_limit_max_requests,
            window: std::time::Duration::from_secs(self.rate_limit_window_seconds),
            idle_eviction: std::time::Duration::from_secs(self.rate_limit_idle_seconds),
            sweep_interval: std::time::Duration::from_secs(self.rate_limit_sweep_seconds),
        }
    }
}
