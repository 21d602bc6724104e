//! Handler functions for authentication-related API endpoints.
//!
//! These functions parse request data, validate input, delegate to the
//! `SessionManager` and translate its outcome into HTTP, including the
//! `refresh_token` cookie.

use crate::api::AppState;
use crate::api::audit::RequestMeta;
use crate::api::common::{ApiResponse, auth_error_to_http, validation_error_response};
use crate::auth::models::*;
use crate::auth::service::{IssuedTokens, LoginOutcome};
use crate::database::models::AuditAction;
use crate::errors::AuthError;
use crate::utils::jwt::Claims;
use axum::{
    extract::{Extension, Json, Path},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Json as ResponseJson, Response},
};
use uuid::Uuid;
use validator::Validate;

const AUDIT_PAGE_SIZE: u32 = 50;

pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
pub const REFRESH_COOKIE_PATH: &str = "/auth/refresh";

/// `refresh_token` cookie scoped to the refresh endpoint.
pub fn refresh_cookie(token: &str, max_age_seconds: i64) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{REFRESH_COOKIE_NAME}={token}; Path={REFRESH_COOKIE_PATH}; HttpOnly; Secure; SameSite=Strict; Max-Age={max_age_seconds}"
    ))
}

fn cleared_refresh_cookie() -> HeaderValue {
    HeaderValue::from_static(
        "refresh_token=; Path=/auth/refresh; HttpOnly; Secure; SameSite=Strict; Max-Age=0",
    )
}

fn refresh_cookie_value(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(COOKIE)?.to_str().ok()?;
    for pair in value.split(';') {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == REFRESH_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn internal_error() -> (StatusCode, String) {
    auth_error_to_http(AuthError::internal_error("failed to build session cookie"))
}

/// Access token in the body, refresh token in the cookie.
fn session_response(state: &AppState, tokens: IssuedTokens) -> Result<Response, (StatusCode, String)> {
    let max_age = state.sessions.settings().refresh_token_ttl.num_seconds();
    let cookie = refresh_cookie(&tokens.refresh_token, max_age).map_err(|_| internal_error())?;
    let body = TokenResponse::bearer(
        tokens.access_token,
        tokens.expires_in,
        tokens.password_reset_required,
    );
    Ok(([(SET_COOKIE, cookie)], ResponseJson(body)).into_response())
}

/// Handle user login request
#[axum::debug_handler]
pub async fn login(
    Extension(state): Extension<AppState>,
    meta: RequestMeta,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, (StatusCode, String)> {
    payload.validate().map_err(validation_error_response)?;

    let outcome = match state
        .sessions
        .login(&payload.username, &payload.password)
        .await
    {
        Ok(outcome) => outcome,
        Err(error) => {
            if matches!(error, AuthError::InvalidCredentials) {
                state.record_audit(AuditAction::LoginFailed, None, &meta).await;
            }
            return Err(auth_error_to_http(error));
        }
    };

    match outcome {
        LoginOutcome::Authenticated(tokens) => {
            state
                .record_audit(AuditAction::Login, Some(tokens.user_id), &meta)
                .await;
            session_response(&state, tokens)
        }
        LoginOutcome::OtpRequired { challenge } => Ok(ResponseJson(OtpRequiredResponse {
            otp_required: true,
            challenge,
        })
        .into_response()),
    }
}

/// Handle token refresh request; the token comes from the cookie only.
#[axum::debug_handler]
pub async fn refresh(
    Extension(state): Extension<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    let raw = refresh_cookie_value(&headers)
        .ok_or_else(|| auth_error_to_http(AuthError::InvalidOrExpiredToken))?;

    match state.sessions.refresh(&raw).await {
        Ok(tokens) => session_response(&state, tokens),
        Err(error) => {
            if let AuthError::TokenReuseDetected { user_id } = &error {
                let owner = user_id.parse::<Uuid>().ok();
                state.record_audit(AuditAction::TokenReuse, owner, &meta).await;
            }
            Err(auth_error_to_http(error))
        }
    }
}

/// Revoke the presented refresh token and clear the cookie.
#[axum::debug_handler]
pub async fn logout(
    Extension(state): Extension<AppState>,
    meta: RequestMeta,
    headers: HeaderMap,
) -> Result<Response, (StatusCode, String)> {
    if let Some(raw) = refresh_cookie_value(&headers) {
        let owner = state
            .sessions
            .logout(&raw)
            .await
            .map_err(auth_error_to_http)?;
        if let Some(user_id) = owner {
            state.record_audit(AuditAction::Logout, Some(user_id), &meta).await;
        }
    }
    Ok((
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, cleared_refresh_cookie())],
    )
        .into_response())
}

/// Complete a login that is waiting for its second factor.
#[axum::debug_handler]
pub async fn verify_otp(
    Extension(state): Extension<AppState>,
    meta: RequestMeta,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Response, (StatusCode, String)> {
    payload.validate().map_err(validation_error_response)?;

    let tokens = state
        .sessions
        .verify_otp(&payload.challenge, &payload.code)
        .await
        .map_err(auth_error_to_http)?;
    state
        .record_audit(AuditAction::OtpVerified, Some(tokens.user_id), &meta)
        .await;
    session_response(&state, tokens)
}

#[axum::debug_handler]
pub async fn enroll_otp(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<ResponseJson<OtpEnrollmentResponse>, (StatusCode, String)> {
    let user_id = claims.user_id().map_err(auth_error_to_http)?;
    let enrollment = state
        .sessions
        .enroll_otp(user_id)
        .await
        .map_err(auth_error_to_http)?;

    Ok(ResponseJson(OtpEnrollmentResponse {
        secret: enrollment.secret,
        otpauth_uri: enrollment.otpauth_uri,
    }))
}

/// Always 202 for a well-formed email, whether or not an account exists.
#[axum::debug_handler]
pub async fn forgot_password(
    Extension(state): Extension<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Response, (StatusCode, String)> {
    payload.validate().map_err(validation_error_response)?;

    state
        .sessions
        .forgot_password(&payload.email)
        .await
        .map_err(auth_error_to_http)?;

    Ok((
        StatusCode::ACCEPTED,
        ResponseJson(ApiResponse::<()>::success(
            (),
            "If the account exists, a reset link has been sent",
        )),
    )
        .into_response())
}

#[axum::debug_handler]
pub async fn reset_password(
    Extension(state): Extension<AppState>,
    meta: RequestMeta,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    payload.validate().map_err(validation_error_response)?;

    match state
        .sessions
        .reset_password(&payload.token, &payload.password)
        .await
    {
        Ok(user_id) => {
            state
                .record_audit(AuditAction::PasswordReset, Some(user_id), &meta)
                .await;
            Ok(StatusCode::NO_CONTENT)
        }
        Err(AuthError::InvalidOrExpiredToken) => Err((
            StatusCode::BAD_REQUEST,
            serde_json::to_string(&ApiResponse::<()>::error(
                "invalid or expired token",
                "invalid_token",
                None,
            ))
            .unwrap_or_default(),
        )),
        Err(error) => Err(auth_error_to_http(error)),
    }
}

/// Get current user info from the access token
#[axum::debug_handler]
pub async fn me(Extension(claims): Extension<Claims>) -> ResponseJson<MeResponse> {
    ResponseJson(MeResponse {
        user_id: claims.sub.clone(),
        role: claims.role(),
        expires_at: claims.exp,
    })
}

/// Admin: end every session of `user_id`.
#[axum::debug_handler]
pub async fn revoke_user_sessions(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
    meta: RequestMeta,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, (StatusCode, String)> {
    let revoked = state
        .sessions
        .revoke_sessions(user_id)
        .await
        .map_err(auth_error_to_http)?;

    tracing::info!(
        target: "audit",
        admin_id = %claims.sub,
        user_id = %user_id,
        revoked_sessions = revoked,
        "sessions revoked by admin"
    );
    state
        .record_audit(AuditAction::SessionsRevoked, Some(user_id), &meta)
        .await;
    Ok(ResponseJson(ApiResponse::success(
        serde_json::json!({ "revoked": revoked }),
        "Sessions revoked",
    )))
}

/// Admin: enable or disable an account. Disabling ends every session.
#[axum::debug_handler]
pub async fn set_user_active(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
    meta: RequestMeta,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<SetActiveRequest>,
) -> Result<ResponseJson<ApiResponse<AccountStatusResponse>>, (StatusCode, String)> {
    let revoked = state
        .sessions
        .set_account_active(user_id, payload.active)
        .await
        .map_err(auth_error_to_http)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                serde_json::to_string(&ApiResponse::<()>::error(
                    "User not found",
                    "not_found",
                    None,
                ))
                .unwrap_or_default(),
            )
        })?;

    let action = if payload.active {
        AuditAction::AccountEnabled
    } else {
        AuditAction::AccountDisabled
    };
    tracing::info!(
        target: "audit",
        admin_id = %claims.sub,
        user_id = %user_id,
        active = payload.active,
        "account status changed by admin"
    );
    state.record_audit(action, Some(user_id), &meta).await;

    Ok(ResponseJson(ApiResponse::success(
        AccountStatusResponse {
            user_id: user_id.to_string(),
            active: payload.active,
            revoked_sessions: revoked,
        },
        "Account updated",
    )))
}

/// Admin: most recent audit entries for `user_id`.
#[axum::debug_handler]
pub async fn user_audit_log(
    Extension(state): Extension<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<ResponseJson<ApiResponse<Vec<AuditEntryResponse>>>, (StatusCode, String)> {
    let entries = state
        .audit
        .recent_for_user(user_id, AUDIT_PAGE_SIZE)
        .await
        .map_err(|e| auth_error_to_http(AuthError::from(e)))?;

    Ok(ResponseJson(ApiResponse::ok(
        entries
            .into_iter()
            .map(|entry| AuditEntryResponse {
                action: entry.action,
                ip_address: entry.ip_address,
                user_agent: entry.user_agent,
                created_at: entry.created_at.to_rfc3339(),
            })
            .collect(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_cookie_attributes() {
        let cookie = refresh_cookie("abc", 604800).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("refresh_token=abc;"));
        for attribute in [
            "Path=/auth/refresh",
            "HttpOnly",
            "Secure",
            "SameSite=Strict",
            "Max-Age=604800",
        ] {
            assert!(cookie.contains(attribute), "missing {attribute}");
        }
    }

    #[test]
    fn test_refresh_cookie_value_is_found_among_others() {
        let mut headers = HeaderMap::new();
        assert_eq!(refresh_cookie_value(&headers), None);

        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; refresh_token=tok123; lang=en"),
        );
        assert_eq!(refresh_cookie_value(&headers).as_deref(), Some("tok123"));

        headers.insert(COOKIE, HeaderValue::from_static("refresh_token="));
        assert_eq!(refresh_cookie_value(&headers), None);
    }
}
