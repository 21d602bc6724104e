//! Central module for the HTTP layer shared by every route group.
//!
//! Holds the response envelope, the audit helpers and the state handle
//! injected into handlers and middleware through `Extension`.

pub mod audit;
pub mod common;

use crate::auth::service::SessionManager;
use crate::middleware::RateLimiter;
use crate::repositories::AuditStore;
use std::sync::Arc;

/// Shared application state, cloned into every request.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub limiter: Arc<RateLimiter>,
    pub audit: Arc<dyn AuditStore>,
}

impl AppState {
    pub fn new(
        sessions: SessionManager,
        limiter: Arc<RateLimiter>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            sessions: Arc::new(sessions),
            limiter,
            audit,
        }
    }
}
