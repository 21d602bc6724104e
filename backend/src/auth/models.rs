//! Data structures for authentication requests and responses.
//!
//! Refresh tokens never appear in these bodies; they travel only in the
//! `refresh_token` cookie.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::models::Role;

/// Login request payload. `username` also accepts an email address.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 254, message = "Username is required"))]
    pub username: String,

    #[validate(length(min = 1, max = 1024, message = "Password is required"))]
    pub password: String,
}

/// Body returned whenever a session is established or refreshed.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    /// Set until the account replaces a provisioned password.
    pub password_reset_required: bool,
}

impl TokenResponse {
    pub fn bearer(access_token: String, expires_in: i64, password_reset_required: bool) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            password_reset_required,
        }
    }
}

/// Login halted for a second factor.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtpRequiredResponse {
    pub otp_required: bool,
    pub challenge: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyOtpRequest {
    #[validate(length(min = 1, message = "Challenge is required"))]
    pub challenge: String,

    #[validate(length(min = 6, max = 8, message = "Code must be 6 to 8 digits"))]
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OtpEnrollmentResponse {
    pub secret: String,
    pub otpauth_uri: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(
        min = 8,
        max = 128,
        message = "Password must be between 8 and 128 characters"
    ))]
    pub password: String,
}

/// Identity of the bearer of an access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
    pub role: Role,
    pub expires_at: usize,
}

/// Admin request to enable or disable an account.
#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountStatusResponse {
    pub user_id: String,
    pub active: bool,
    pub revoked_sessions: u64,
}

/// One audit trail row as returned to admins.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditEntryResponse {
    pub action: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}
