//! Request metadata and the best-effort audit write used by handlers.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{header::USER_AGENT, request::Parts};
use uuid::Uuid;

use super::AppState;
use crate::database::models::{AuditAction, AuditEntry};
use crate::middleware::rate_limit::client_ip;

const MAX_USER_AGENT_CHARS: usize = 256;

/// Caller address and user agent as recorded in the audit trail.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub ip_address: String,
    pub user_agent: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for RequestMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.chars().take(MAX_USER_AGENT_CHARS).collect());

        Ok(Self {
            ip_address: client_ip(&parts.headers, peer).to_string(),
            user_agent,
        })
    }
}

impl AppState {
    /// Writes one audit row. A failed write is logged and never fails the request.
    pub async fn record_audit(&self, action: AuditAction, user_id: Option<Uuid>, meta: &RequestMeta) {
        let entry = AuditEntry::new(
            action,
            user_id,
            Some(meta.ip_address.clone()),
            meta.user_agent.clone(),
        );
        if let Err(e) = self.audit.record(&entry).await {
            tracing::warn!(action = action.as_str(), "failed to write audit log: {:#}", e);
        }
    }
}
