//! Session manager: the credential and session state machine.
//!
//! Every decision is re-derived from the stores on each call; nothing about a
//! user or token is cached in process, so revocation takes effect at once.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::AuthSettings;
use crate::database::models::{NewUser, Role, User};
use crate::errors::{AuthError, AuthResult};
use crate::repositories::{CredentialStore, TokenStore};
use crate::services::EmailSender;
use crate::utils::jwt::JwtUtils;
use crate::utils::otp::{self, TotpConfig};
use crate::utils::password::PasswordHasher;
use crate::utils::token_hash::{generate_opaque_token, hash_token};

const PASSWORD_MIN_CHARS: usize = 8;
const PASSWORD_MAX_CHARS: usize = 128;

/// Tokens handed to a client once it is fully authenticated.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub user_id: Uuid,
    /// The account must choose a new password before normal use.
    pub password_reset_required: bool,
    pub access_token: String,
    /// Raw refresh token. Only its digest is persisted.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(IssuedTokens),
    /// Password accepted, second factor outstanding.
    OtpRequired { challenge: String },
}

/// Result of a successful OTP enrollment. The secret is shown exactly once.
#[derive(Debug, Clone)]
pub struct OtpEnrollment {
    pub secret: String,
    pub otpauth_uri: String,
}

pub struct SessionManager {
    credentials: Arc<dyn CredentialStore>,
    tokens: Arc<dyn TokenStore>,
    mailer: Arc<dyn EmailSender>,
    jwt: JwtUtils,
    hasher: PasswordHasher,
    settings: AuthSettings,
    totp: TotpConfig,
}

impl SessionManager {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        tokens: Arc<dyn TokenStore>,
        mailer: Arc<dyn EmailSender>,
        jwt: JwtUtils,
        hasher: PasswordHasher,
        settings: AuthSettings,
    ) -> Self {
        Self {
            credentials,
            tokens,
            mailer,
            jwt,
            hasher,
            settings,
            totp: TotpConfig::default(),
        }
    }

    pub fn jwt(&self) -> &JwtUtils {
        &self.jwt
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Seeds an administrator unless the username or email is already taken.
    /// Returns `true` when a user was created.
    pub async fn ensure_admin(&self, username: &str, email: &str, password: &str) -> AuthResult<bool> {
        check_password_policy(password)?;

        let by_username = self
            .store_call("get_by_username", self.credentials.get_by_username(username))
            .await?;
        if by_username.is_some() {
            return Ok(false);
        }
        let by_email = self
            .store_call("get_by_email", self.credentials.get_by_email(email))
            .await?;
        if by_email.is_some() {
            return Ok(false);
        }

        let password_hash = self.hasher.hash(password).await?;
        let admin = self
            .store_call(
                "create_user",
                self.credentials.create_user(NewUser {
                    username: username.to_string(),
                    email: email.to_string(),
                    password_hash,
                    role: Role::Admin,
                    password_reset_required: true,
                }),
            )
            .await?;
        tracing::info!(target: "audit", user_id = %admin.id, "bootstrap administrator created");
        Ok(true)
    }

    /// Runs a store call under the configured deadline.
    async fn store_call<T, F>(&self, operation: &'static str, fut: F) -> AuthResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(result) => result.map_err(|e| {
                tracing::error!(operation, error = %e, "store operation failed");
                AuthError::from(e)
            }),
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.settings.store_timeout, "store operation timed out");
                Err(AuthError::Timeout(self.settings.store_timeout))
            }
        }
    }

    /// Authenticates `identifier` (username or email) with `password`.
    ///
    /// Unknown users, inactive users and wrong passwords all cost one bcrypt
    /// comparison and surface to the client the same way.
    pub async fn login(&self, identifier: &str, password: &str) -> AuthResult<LoginOutcome> {
        let user = self
            .store_call("get_by_login", self.credentials.get_by_login(identifier))
            .await?;

        let Some(user) = user else {
            self.hasher.verify_dummy(password).await?;
            tracing::warn!(target: "audit", reason = "unknown_user", "login failed");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.hasher.verify(&user.password_hash, password).await? {
            tracing::warn!(target: "audit", user_id = %user.id, reason = "bad_password", "login failed");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            tracing::warn!(target: "audit", user_id = %user.id, reason = "inactive", "login failed");
            return Err(AuthError::InactiveAccount);
        }

        if self.settings.otp_step_up && user.otp_enabled {
            let challenge = self
                .jwt
                .generate_otp_challenge(user.id, self.settings.otp_challenge_ttl)?;
            tracing::info!(target: "audit", user_id = %user.id, "login pending second factor");
            return Ok(LoginOutcome::OtpRequired { challenge });
        }

        let tokens = self.issue_tokens(&user).await?;
        tracing::info!(target: "audit", user_id = %user.id, "login succeeded");
        Ok(LoginOutcome::Authenticated(tokens))
    }

    /// Completes a login that halted for a second factor.
    pub async fn verify_otp(&self, challenge: &str, code: &str) -> AuthResult<IssuedTokens> {
        let user_id = self.jwt.validate_otp_challenge(challenge)?;

        let secret = self
            .store_call("get_otp_secret", self.credentials.get_otp_secret(user_id))
            .await?
            .ok_or(AuthError::InvalidOtp)?;

        if !otp::verify(&secret, code, &self.totp) {
            tracing::warn!(target: "audit", user_id = %user_id, reason = "bad_code", "otp verification failed");
            return Err(AuthError::InvalidOtp);
        }

        let user = self
            .store_call("get_by_id", self.credentials.get_by_id(user_id))
            .await?
            .ok_or(AuthError::InvalidOtp)?;
        if !user.is_active {
            return Err(AuthError::InactiveAccount);
        }

        let tokens = self.issue_tokens(&user).await?;
        tracing::info!(target: "audit", user_id = %user.id, "otp verified, login succeeded");
        Ok(tokens)
    }

    /// Exchanges a refresh token for a rotated one plus a fresh access token.
    pub async fn refresh(&self, raw_token: &str) -> AuthResult<IssuedTokens> {
        if raw_token.is_empty() {
            return Err(AuthError::InvalidOrExpiredToken);
        }
        let digest = hash_token(raw_token);

        let Some(current) = self
            .store_call("get_valid", self.tokens.get_valid(&digest))
            .await?
        else {
            return Err(self.reject_dead_token(&digest).await);
        };

        let user = self
            .store_call("get_by_id", self.credentials.get_by_id(current.user_id))
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        if !user.is_active {
            self.store_call("revoke_all", self.tokens.revoke_all(user.id))
                .await?;
            tracing::warn!(target: "audit", user_id = %user.id, "refresh refused for inactive account");
            return Err(AuthError::InactiveAccount);
        }

        let next_raw = generate_opaque_token();
        let next_expiry = Utc::now() + self.settings.refresh_token_ttl;
        let rotated = self
            .store_call(
                "rotate",
                self.tokens
                    .rotate(current.id, &hash_token(&next_raw), next_expiry),
            )
            .await?;

        if rotated.is_none() {
            // Lost a race against another presentation of the same token.
            return Err(self.revoke_lineage(user.id).await);
        }

        let access_token = self.jwt.generate_token(user.id, user.role)?;
        tracing::debug!(user_id = %user.id, "refresh token rotated");
        Ok(IssuedTokens {
            user_id: user.id,
            password_reset_required: user.password_reset_required,
            access_token,
            refresh_token: next_raw,
            expires_in: self.jwt.access_ttl().num_seconds(),
        })
    }

    /// Revokes the presented refresh token and returns its owner. Unknown or
    /// dead tokens are ignored.
    pub async fn logout(&self, raw_token: &str) -> AuthResult<Option<Uuid>> {
        if raw_token.is_empty() {
            return Ok(None);
        }
        let digest = hash_token(raw_token);
        if let Some(token) = self
            .store_call("get_valid", self.tokens.get_valid(&digest))
            .await?
        {
            self.store_call("revoke", self.tokens.revoke(token.id))
                .await?;
            tracing::info!(target: "audit", user_id = %token.user_id, "logout");
            return Ok(Some(token.user_id));
        }
        Ok(None)
    }

    /// Issues a reset token and mails it. Unknown or inactive emails are a
    /// silent no-op so callers cannot enumerate accounts.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<()> {
        let user = self
            .store_call("get_by_email", self.credentials.get_by_email(email))
            .await?;
        let Some(user) = user.filter(|u| u.is_active) else {
            tracing::debug!("password reset requested for unknown or inactive account");
            return Ok(());
        };

        let raw = generate_opaque_token();
        let expires_at = Utc::now() + self.settings.reset_token_ttl;
        self.store_call(
            "store_reset_token",
            self.credentials
                .store_reset_token(user.id, &hash_token(&raw), expires_at),
        )
        .await?;

        let link = format!(
            "{}/reset-password?token={}",
            self.settings.reset_url_base.trim_end_matches('/'),
            urlencoding::encode(&raw)
        );
        let mailer = Arc::clone(&self.mailer);
        let user_id = user.id;
        let expires_in = self.settings.reset_token_ttl;
        tokio::spawn(async move {
            if let Err(e) = mailer.send_password_reset(&user.email, &link, expires_in).await {
                tracing::error!(user_id = %user_id, error = %e, "Failed to send password reset email");
            }
        });

        tracing::info!(target: "audit", user_id = %user_id, "password reset issued");
        Ok(())
    }

    /// Redeems a reset token: sets the new password and ends every session.
    /// Returns the owner of the token.
    pub async fn reset_password(&self, raw_token: &str, new_password: &str) -> AuthResult<Uuid> {
        check_password_policy(new_password)?;
        let digest = hash_token(raw_token);

        // Reject unknown tokens before hashing.
        self.store_call(
            "validate_reset_token",
            self.credentials.validate_reset_token(&digest),
        )
        .await?
        .ok_or(AuthError::InvalidOrExpiredToken)?;

        let password_hash = self.hasher.hash(new_password).await?;

        let user_id = self
            .store_call(
                "consume_reset_token",
                self.credentials.consume_reset_token(&digest),
            )
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;

        // a disabled account cannot be taken over through a reset issued earlier
        let owner = self
            .store_call("get_by_id", self.credentials.get_by_id(user_id))
            .await?;
        if !owner.is_some_and(|u| u.is_active) {
            tracing::warn!(target: "audit", user_id = %user_id, reason = "inactive", "password reset refused");
            return Err(AuthError::InvalidOrExpiredToken);
        }

        if !self
            .store_call(
                "update_password",
                self.credentials.update_password(user_id, &password_hash),
            )
            .await?
        {
            return Err(AuthError::InvalidOrExpiredToken);
        }

        let revoked = self
            .store_call("revoke_all", self.tokens.revoke_all(user_id))
            .await?;
        tracing::info!(target: "audit", user_id = %user_id, revoked_sessions = revoked, "password reset completed");
        Ok(user_id)
    }

    /// Ends every session of `user_id`. Returns how many tokens were live.
    pub async fn revoke_sessions(&self, user_id: Uuid) -> AuthResult<u64> {
        self.store_call("revoke_all", self.tokens.revoke_all(user_id))
            .await
    }

    /// Enables or disables an account. Disabling also ends every session.
    /// Returns the number of sessions revoked, or `None` for an unknown user.
    pub async fn set_account_active(&self, user_id: Uuid, active: bool) -> AuthResult<Option<u64>> {
        if !self
            .store_call("set_active", self.credentials.set_active(user_id, active))
            .await?
        {
            return Ok(None);
        }
        if active {
            tracing::info!(target: "audit", user_id = %user_id, "account enabled");
            return Ok(Some(0));
        }

        let revoked = self
            .store_call("revoke_all", self.tokens.revoke_all(user_id))
            .await?;
        tracing::info!(target: "audit", user_id = %user_id, revoked_sessions = revoked, "account disabled");
        Ok(Some(revoked))
    }

    /// Generates, stores and returns a new OTP secret for `user_id`.
    pub async fn enroll_otp(&self, user_id: Uuid) -> AuthResult<OtpEnrollment> {
        let user = self
            .store_call("get_by_id", self.credentials.get_by_id(user_id))
            .await?
            .ok_or(AuthError::InvalidOrExpiredToken)?;
        if !user.is_active {
            return Err(AuthError::InactiveAccount);
        }

        let secret = otp::generate_secret();
        if !self
            .store_call(
                "set_otp_secret",
                self.credentials.set_otp_secret(user.id, &secret),
            )
            .await?
        {
            return Err(AuthError::internal_error("user vanished during enrollment"));
        }

        let otpauth_uri =
            otp::provisioning_uri(&secret, &user.email, &self.settings.otp_issuer, &self.totp);
        tracing::info!(target: "audit", user_id = %user.id, "otp enrolled");
        Ok(OtpEnrollment {
            secret,
            otpauth_uri,
        })
    }

    async fn issue_tokens(&self, user: &User) -> AuthResult<IssuedTokens> {
        let access_token = self.jwt.generate_token(user.id, user.role)?;

        let refresh_token = generate_opaque_token();
        let expires_at = Utc::now() + self.settings.refresh_token_ttl;
        self.store_call(
            "store_refresh_token",
            self.tokens
                .store(user.id, &hash_token(&refresh_token), expires_at),
        )
        .await?;

        Ok(IssuedTokens {
            user_id: user.id,
            password_reset_required: user.password_reset_required,
            access_token,
            refresh_token,
            expires_in: self.jwt.access_ttl().num_seconds(),
        })
    }

    /// Classifies a digest with no valid record. A revoked record means the
    /// token was already rotated away and is being replayed.
    async fn reject_dead_token(&self, digest: &str) -> AuthError {
        match self
            .store_call("find_by_hash", self.tokens.find_by_hash(digest))
            .await
        {
            Ok(Some(record)) if record.revoked => self.revoke_lineage(record.user_id).await,
            Ok(_) => AuthError::InvalidOrExpiredToken,
            Err(e) => e,
        }
    }

    async fn revoke_lineage(&self, user_id: Uuid) -> AuthError {
        match self
            .store_call("revoke_all", self.tokens.revoke_all(user_id))
            .await
        {
            Ok(revoked) => {
                tracing::warn!(
                    target: "audit",
                    user_id = %user_id,
                    revoked_sessions = revoked,
                    "refresh token reuse detected; all sessions revoked"
                );
                AuthError::token_reuse(user_id)
            }
            Err(e) => e,
        }
    }
}

fn check_password_policy(password: &str) -> AuthResult<()> {
    let chars = password.chars().count();
    if !(PASSWORD_MIN_CHARS..=PASSWORD_MAX_CHARS).contains(&chars) {
        return Err(AuthError::validation(format!(
            "Password must be between {PASSWORD_MIN_CHARS} and {PASSWORD_MAX_CHARS} characters"
        )));
    }
    Ok(())
}
