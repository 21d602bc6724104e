//! Defines the HTTP routes specifically for authentication.
//!
//! Credential-handling endpoints sit behind the per-IP rate limiter; the
//! bearer-protected ones sit behind `jwt_auth`. Both expect `AppState` to be
//! provided by an outer `Extension` layer.

use crate::auth::handlers::*;
use crate::auth::middleware::*;
use crate::middleware::rate_limit;
use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};

/// Creates the authentication router with all auth-related routes
pub fn auth_router() -> Router {
    let throttled = Router::new()
        .route("/login", post(login))
        .route("/refresh", post(refresh).delete(logout))
        .route("/otp/verify", post(verify_otp))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
        .route_layer(middleware::from_fn(rate_limit));

    let authenticated = Router::new()
        .route("/me", get(me))
        .route("/otp/enroll", post(enroll_otp))
        .route(
            "/sessions/{user_id}",
            delete(revoke_user_sessions)
                .route_layer(middleware::from_fn_with_state(ADMIN_ONLY, require_role)),
        )
        .route(
            "/users/{user_id}/active",
            patch(set_user_active)
                .route_layer(middleware::from_fn_with_state(ADMIN_ONLY, require_role)),
        )
        .route(
            "/users/{user_id}/audit",
            get(user_audit_log)
                .route_layer(middleware::from_fn_with_state(ADMIN_ONLY, require_role)),
        )
        .route_layer(middleware::from_fn(jwt_auth));

    throttled.merge(authenticated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppState;
    use crate::auth::models::TokenResponse;
    use crate::auth::service::SessionManager;
    use crate::config::{AuthSettings, RateLimitSettings};
    use crate::database::models::{NewUser, Role, User};
    use crate::middleware::{RateLimiter, with_security_headers};
    use crate::repositories::{InMemoryAuditStore, InMemoryCredentialStore, InMemoryTokenStore};
    use crate::services::LogEmailSender;
    use crate::utils::jwt::JwtUtils;
    use crate::utils::password::PasswordHasher;
    use axum::{
        Extension,
        body::{Body, to_bytes},
        http::{Request, Response, StatusCode, header},
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    const PASSWORD: &str = "hunter22-but-longer";

    struct TestApp {
        router: Router,
        users: Arc<InMemoryCredentialStore>,
        audit: Arc<InMemoryAuditStore>,
    }

    fn test_app(limit: RateLimitSettings) -> TestApp {
        let users = Arc::new(InMemoryCredentialStore::new());
        let settings = AuthSettings::default();
        let sessions = SessionManager::new(
            users.clone(),
            Arc::new(InMemoryTokenStore::new()),
            Arc::new(LogEmailSender),
            JwtUtils::new("an-http-test-secret-of-32-bytes!", settings.access_token_ttl),
            PasswordHasher::new(4).unwrap(),
            settings,
        );
        let audit = Arc::new(InMemoryAuditStore::new());
        let state = AppState::new(sessions, Arc::new(RateLimiter::new(limit)), audit.clone());
        let router = with_security_headers(
            Router::new()
                .nest("/auth", auth_router())
                .layer(Extension(state)),
        );
        TestApp {
            router,
            users,
            audit,
        }
    }

    fn relaxed() -> RateLimitSettings {
        RateLimitSettings {
            max_requests: 1_000,
            ..RateLimitSettings::default()
        }
    }

    fn add_user(app: &TestApp, name: &str, role: Role) -> User {
        app.users
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
                role,
                password_reset_required: false,
            })
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
        app.router.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn refresh_cookie_of(response: &Response<Body>) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .unwrap()
            .to_str()
            .unwrap();
        set_cookie
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches("refresh_token=")
            .to_string()
    }

    async fn login(app: &TestApp, username: &str) -> (String, String) {
        let response = send(
            app,
            json_request(
                "POST",
                "/auth/login",
                json!({ "username": username, "password": PASSWORD }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = refresh_cookie_of(&response);
        let body: TokenResponse = serde_json::from_value(body_json(response).await).unwrap();
        (body.access_token, cookie)
    }

    fn with_cookie(method: &str, cookie: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri("/auth/refresh")
            .header(header::COOKIE, format!("refresh_token={cookie}"))
            .body(Body::empty())
            .unwrap()
    }

    fn with_bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    }

    fn admin_json(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_sets_scoped_cookie_and_returns_access_token() {
        let app = test_app(relaxed());
        add_user(&app, "carol", Role::Support);

        let response = send(
            &app,
            json_request(
                "POST",
                "/auth/login",
                json!({ "username": "carol", "password": PASSWORD }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("Path=/auth/refresh"));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Strict"));

        let body = body_json(response).await;
        assert!(body["access_token"].as_str().is_some());
        assert!(body.get("refresh_token").is_none());
        assert_eq!(body["password_reset_required"], false);
    }

    #[tokio::test]
    async fn test_login_failures_look_identical() {
        let app = test_app(relaxed());
        add_user(&app, "dave", Role::Customer);

        let wrong = send(
            &app,
            json_request(
                "POST",
                "/auth/login",
                json!({ "username": "dave", "password": "not the password" }),
            ),
        )
        .await;
        let unknown = send(
            &app,
            json_request(
                "POST",
                "/auth/login",
                json!({ "username": "nobody", "password": "not the password" }),
            ),
        )
        .await;

        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        let (wrong, unknown) = (body_json(wrong).await, body_json(unknown).await);
        assert_eq!(wrong["message"], unknown["message"]);
        assert_eq!(wrong["error"], unknown["error"]);
    }

    #[tokio::test]
    async fn test_refresh_rotates_cookie_and_rejects_replay() {
        let app = test_app(relaxed());
        add_user(&app, "erin", Role::Customer);
        let (_, first) = login(&app, "erin").await;

        let rotated = send(&app, with_cookie("POST", &first)).await;
        assert_eq!(rotated.status(), StatusCode::OK);
        let second = refresh_cookie_of(&rotated);
        assert_ne!(first, second);

        let replay = send(&app, with_cookie("POST", &first)).await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);

        // reuse ended the lineage, so the fresh child is dead as well
        let child = send(&app, with_cookie("POST", &second)).await;
        assert_eq!(child.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_without_cookie_is_unauthorized() {
        let app = test_app(relaxed());
        let response = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/auth/refresh")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_clears_cookie_and_revokes() {
        let app = test_app(relaxed());
        add_user(&app, "frank", Role::Customer);
        let (_, cookie) = login(&app, "frank").await;

        let response = send(&app, with_cookie("DELETE", &cookie)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(
            response.headers()[header::SET_COOKIE]
                .to_str()
                .unwrap()
                .contains("Max-Age=0")
        );

        let after = send(&app, with_cookie("POST", &cookie)).await;
        assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_sixth_login_attempt_is_throttled() {
        let app = test_app(RateLimitSettings::default());
        for _ in 0..5 {
            let response = send(
                &app,
                json_request(
                    "POST",
                    "/auth/login",
                    json!({ "username": "ghost", "password": "x" }),
                ),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let sixth = send(
            &app,
            json_request(
                "POST",
                "/auth/login",
                json!({ "username": "ghost", "password": "x" }),
            ),
        )
        .await;
        assert_eq!(sixth.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_me_requires_valid_bearer() {
        let app = test_app(relaxed());
        let user = add_user(&app, "gina", Role::Support);
        let (access, _) = login(&app, "gina").await;

        let anonymous = send(
            &app,
            Request::builder()
                .uri("/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let forged = send(&app, with_bearer("GET", "/auth/me", "not.a.jwt")).await;
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

        let response = send(&app, with_bearer("GET", "/auth/me", &access)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["user_id"], user.id.to_string());
        assert_eq!(body["role"], "support");
    }

    #[tokio::test]
    async fn test_otp_enrollment_then_login_requires_challenge() {
        let app = test_app(relaxed());
        add_user(&app, "hank", Role::Admin);
        let (access, _) = login(&app, "hank").await;

        let enrolled = send(&app, with_bearer("POST", "/auth/otp/enroll", &access)).await;
        assert_eq!(enrolled.status(), StatusCode::OK);
        let enrolled = body_json(enrolled).await;
        assert!(
            enrolled["otpauth_uri"]
                .as_str()
                .unwrap()
                .starts_with("otpauth://totp/")
        );

        let response = send(
            &app,
            json_request(
                "POST",
                "/auth/login",
                json!({ "username": "hank", "password": PASSWORD }),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let body = body_json(response).await;
        assert_eq!(body["otp_required"], true);

        let bad = send(
            &app,
            json_request(
                "POST",
                "/auth/otp/verify",
                json!({ "challenge": body["challenge"], "code": "12345" }),
            ),
        )
        .await;
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_password_endpoints_do_not_leak_state() {
        let app = test_app(relaxed());

        let forgot = send(
            &app,
            json_request(
                "POST",
                "/auth/forgot-password",
                json!({ "email": "nobody@example.com" }),
            ),
        )
        .await;
        assert_eq!(forgot.status(), StatusCode::ACCEPTED);

        let reset = send(
            &app,
            json_request(
                "POST",
                "/auth/reset-password",
                json!({ "token": "made-up", "password": "long enough password" }),
            ),
        )
        .await;
        assert_eq!(reset.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(reset).await["message"], "invalid or expired token");

        let short = send(
            &app,
            json_request(
                "POST",
                "/auth/reset-password",
                json!({ "token": "made-up", "password": "short" }),
            ),
        )
        .await;
        assert_eq!(short.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(short).await["error"]["error_type"], "validation_error");
    }

    #[tokio::test]
    async fn test_session_revocation_is_admin_only() {
        let app = test_app(relaxed());
        let customer = add_user(&app, "ivan", Role::Customer);
        add_user(&app, "judy", Role::Admin);
        let (customer_access, customer_cookie) = login(&app, "ivan").await;
        let (admin_access, _) = login(&app, "judy").await;
        let uri = format!("/auth/sessions/{}", customer.id);

        let denied = send(&app, with_bearer("DELETE", &uri, &customer_access)).await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let allowed = send(&app, with_bearer("DELETE", &uri, &admin_access)).await;
        assert_eq!(allowed.status(), StatusCode::OK);
        assert_eq!(body_json(allowed).await["data"]["revoked"], 1);

        let after = send(&app, with_cookie("POST", &customer_cookie)).await;
        assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_can_disable_and_enable_account() {
        let app = test_app(relaxed());
        let target = add_user(&app, "kate", Role::Support);
        add_user(&app, "lena", Role::Admin);
        let (target_access, target_cookie) = login(&app, "kate").await;
        let (admin_access, _) = login(&app, "lena").await;
        let uri = format!("/auth/users/{}/active", target.id);

        let denied = send(
            &app,
            admin_json("PATCH", &uri, &target_access, json!({ "active": false })),
        )
        .await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);

        let disabled = send(
            &app,
            admin_json("PATCH", &uri, &admin_access, json!({ "active": false })),
        )
        .await;
        assert_eq!(disabled.status(), StatusCode::OK);
        let body = body_json(disabled).await;
        assert_eq!(body["data"]["active"], false);
        assert_eq!(body["data"]["revoked_sessions"], 1);

        let refreshed = send(&app, with_cookie("POST", &target_cookie)).await;
        assert_eq!(refreshed.status(), StatusCode::UNAUTHORIZED);
        let relogin = send(
            &app,
            json_request(
                "POST",
                "/auth/login",
                json!({ "username": "kate", "password": PASSWORD }),
            ),
        )
        .await;
        assert_eq!(relogin.status(), StatusCode::UNAUTHORIZED);

        let enabled = send(
            &app,
            admin_json("PATCH", &uri, &admin_access, json!({ "active": true })),
        )
        .await;
        assert_eq!(enabled.status(), StatusCode::OK);
        login(&app, "kate").await;

        let unknown = send(
            &app,
            admin_json(
                "PATCH",
                &format!("/auth/users/{}/active", uuid::Uuid::now_v7()),
                &admin_access,
                json!({ "active": false }),
            ),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_audit_trail_records_security_events() {
        let app = test_app(relaxed());
        let user = add_user(&app, "mona", Role::Customer);
        add_user(&app, "nils", Role::Admin);

        let failed = send(
            &app,
            Request::builder()
                .method("POST")
                .uri("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::USER_AGENT, "ticket-client/1.0")
                .header("x-forwarded-for", "198.51.100.4")
                .body(Body::from(
                    json!({ "username": "mona", "password": "wrong password" }).to_string(),
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(failed.status(), StatusCode::UNAUTHORIZED);

        login(&app, "mona").await;
        let (admin_access, _) = login(&app, "nils").await;
        let revoke = send(
            &app,
            with_bearer("DELETE", &format!("/auth/sessions/{}", user.id), &admin_access),
        )
        .await;
        assert_eq!(revoke.status(), StatusCode::OK);

        let failures: Vec<_> = app
            .audit
            .entries()
            .into_iter()
            .filter(|entry| entry.user_id.is_none())
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].action, "login_failed");
        assert_eq!(failures[0].ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(failures[0].user_agent.as_deref(), Some("ticket-client/1.0"));

        let trail = send(
            &app,
            with_bearer("GET", &format!("/auth/users/{}/audit", user.id), &admin_access),
        )
        .await;
        assert_eq!(trail.status(), StatusCode::OK);
        let actions: Vec<String> = body_json(trail).await["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| entry["action"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(actions, vec!["sessions_revoked", "login"]);
    }

    #[tokio::test]
    async fn test_security_headers_on_rejected_requests() {
        let app = test_app(relaxed());
        let response = send(
            &app,
            Request::builder()
                .uri("/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }
}
