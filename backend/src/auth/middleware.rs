//! Middleware for protecting authenticated routes and handling authorization.
//!
//! `jwt_auth` validates the bearer access token and stores its `Claims` in
//! the request extensions; `require_role` runs after it and checks the role.

use crate::api::AppState;
use crate::database::models::Role;
use crate::utils::jwt::Claims;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// JWT authentication middleware
pub async fn jwt_auth(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    let state = request
        .extensions()
        .get::<AppState>()
        .cloned()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let claims = {
        let token = bearer_token(request.headers()).ok_or(StatusCode::UNAUTHORIZED)?;
        state
            .sessions
            .jwt()
            .validate_token(token)
            .map_err(|_| StatusCode::UNAUTHORIZED)?
    };

    // Add claims to request extensions for use in handlers
    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Role authorization middleware, used with `from_fn_with_state`.
pub async fn require_role(
    State(allowed): State<&'static [Role]>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !allowed.iter().any(|role| claims.has_role(*role)) {
        tracing::warn!(user_id = %claims.sub, role = %claims.role, "forbidden by role guard");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}
