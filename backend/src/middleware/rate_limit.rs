//! Per-client fixed-window request throttling.
//!
//! One counter per client IP, all behind a single mutex. A background sweeper
//! evicts clients that have been idle longer than the eviction threshold; the
//! sweeper lives exactly as long as the [`SweeperHandle`] that owns it.

use crate::api::AppState;
use crate::api::common::ApiResponse;
use crate::config::RateLimitSettings;
use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

#[derive(Debug)]
struct ClientWindow {
    started: Instant,
    count: u32,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    settings: RateLimitSettings,
    clients: Mutex<HashMap<IpAddr, ClientWindow>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<IpAddr, ClientWindow>> {
        // counters stay usable even if a holder panicked
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn check(&self, ip: IpAddr) -> RateLimitDecision {
        self.check_at(ip, Instant::now())
    }

    /// Records one request from `ip` at `now` and decides whether it may pass.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> RateLimitDecision {
        let mut clients = self.clients();
        let window = clients.entry(ip).or_insert(ClientWindow {
            started: now,
            count: 0,
            last_seen: now,
        });

        if now.saturating_duration_since(window.started) >= self.settings.window {
            window.started = now;
            window.count = 0;
        }
        window.last_seen = now;

        if window.count >= self.settings.max_requests {
            return RateLimitDecision::Limited;
        }
        window.count += 1;
        RateLimitDecision::Allowed
    }

    /// Drops clients idle for longer than the eviction threshold.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let idle = self.settings.idle_eviction;
        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|_, window| now.saturating_duration_since(window.last_seen) < idle);
        before - clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients().len()
    }

    /// Starts the periodic sweeper. Dropping the returned handle stops it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let limiter = Arc::clone(self);
        let period = self.settings.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = limiter.sweep_at(Instant::now());
                if evicted > 0 {
                    tracing::debug!(
                        evicted,
                        remaining = limiter.tracked_clients(),
                        "rate limiter swept idle clients"
                    );
                }
            }
        });
        SweeperHandle { task }
    }
}

/// Owns the sweeper task; aborts it on drop.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn shutdown(self) {}
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Client address for throttling: first `X-Forwarded-For` hop, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .and_then(|value| value.parse::<IpAddr>().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rejects requests over the per-IP budget with 429.
pub async fn rate_limit(request: Request, next: Next) -> Result<Response, (StatusCode, String)> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    let limiter = request
        .extensions()
        .get::<AppState>()
        .map(|state| Arc::clone(&state.limiter))
        .ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        ))?;

    if limiter.check(ip) == RateLimitDecision::Limited {
        tracing::warn!(client_ip = %ip, path = %request.uri().path(), "rate limit exceeded");
        let body = ApiResponse::<()>::error("too many requests", "rate_limited", None);
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::to_string(&body).unwrap_or_default(),
        ));
    }

    Ok(next.run(request).await)
}
