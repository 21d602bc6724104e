//! Global application error types.
//!
//! This module defines the error taxonomy shared by the credential and session
//! lifecycle. Authentication-decision variants exist so that logs and the audit
//! trail can tell failures apart; the HTTP layer collapses them into a single
//! generic outcome (see `api::common::auth_error_to_http`).

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the session manager and its collaborators.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown identifier or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Missing OTP secret, bad code, or bad pending-OTP challenge.
    #[error("invalid one-time password")]
    InvalidOtp,

    /// A refresh token that was already rotated away was presented again.
    #[error("refresh token reuse detected for user {user_id}")]
    TokenReuseDetected { user_id: String },

    /// Refresh, reset, or access token is unknown, expired, or malformed.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    /// The account exists but has been disabled.
    #[error("account is inactive")]
    InactiveAccount,

    /// Request payload failed validation.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A store operation did not finish within the caller's deadline.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Infrastructure error: {source}")]
    Infrastructure {
        #[from]
        source: anyhow::Error,
    },

    #[error("Signing error: {message}")]
    Signing { message: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn token_reuse(user_id: impl ToString) -> Self {
        Self::TokenReuseDetected {
            user_id: user_id.to_string(),
        }
    }

    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// True for failures the client may retry without changing its request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Infrastructure { .. })
    }

    /// True for outcomes of an authentication decision, as opposed to faults.
    pub fn is_auth_decision(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::InvalidOtp
                | Self::TokenReuseDetected { .. }
                | Self::InvalidOrExpiredToken
                | Self::InactiveAccount
        )
    }
}
