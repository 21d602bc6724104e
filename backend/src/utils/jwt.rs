//! JWT token utilities for authentication and authorization.
//!
//! Access tokens are short-lived HS256 claim sets (`sub`, `role`, `iat`,
//! `exp`) with no server-side state; they cannot be revoked before `exp`.
//! The same key also signs the pending-OTP challenge handed out when login
//! halts for a second factor.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::Role;
use crate::errors::{AuthError, AuthResult};

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub role: Role,
    /// Token issued at timestamp
    pub iat: usize,
    /// Token expiration timestamp
    pub exp: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
enum ChallengePurpose {
    OtpStepUp,
}

/// Claims of a pending-OTP challenge. Only its subject is trusted.
#[derive(Debug, Serialize, Deserialize, Clone)]
struct ChallengeClaims {
    sub: String,
    purpose: ChallengePurpose,
    iat: usize,
    exp: usize,
}

/// JWT token utility for creating and validating tokens
pub struct JwtUtils {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
}

impl JwtUtils {
    pub fn new(secret: &str, access_ttl: Duration) -> Self {
        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        // Only HS256 is accepted; any other `alg` in the header is rejected.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        JwtUtils {
            encoding_key,
            decoding_key,
            validation,
            access_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Generate an access token for `user_id` with `role`, issued now.
    pub fn generate_token(&self, user_id: Uuid, role: Role) -> AuthResult<String> {
        self.generate_token_at(user_id, role, Utc::now())
    }

    /// Generate an access token as if issued at `issued_at`.
    pub fn generate_token_at(
        &self,
        user_id: Uuid,
        role: Role,
        issued_at: DateTime<Utc>,
    ) -> AuthResult<String> {
        let exp = issued_at + self.access_ttl;
        let claims = Claims {
            sub: user_id.to_string(),
            role,
            iat: issued_at.timestamp() as usize,
            exp: exp.timestamp() as usize,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::signing(format!("Token generation failed: {e}")))
    }

    /// Validate signature, algorithm and expiry; return the claims.
    pub fn validate_token(&self, token: &str) -> AuthResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|e| {
                tracing::debug!("access token rejected: {:?}", e.kind());
                AuthError::InvalidOrExpiredToken
            })
    }

    /// Sign a pending-OTP challenge for `user_id`.
    pub fn generate_otp_challenge(&self, user_id: Uuid, ttl: Duration) -> AuthResult<String> {
        let now = Utc::now();
        let claims = ChallengeClaims {
            sub: user_id.to_string(),
            purpose: ChallengePurpose::OtpStepUp,
            iat: now.timestamp() as usize,
            exp: (now + ttl).timestamp() as usize,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::signing(format!("Challenge generation failed: {e}")))
    }

    /// Resolve a challenge back to the pending user id.
    pub fn validate_otp_challenge(&self, challenge: &str) -> AuthResult<Uuid> {
        let data = decode::<ChallengeClaims>(challenge, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidOtp)?;
        Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::InvalidOtp)
    }
}

impl Claims {
    pub fn user_id(&self) -> AuthResult<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| AuthError::InvalidOrExpiredToken)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Check if user has specific role
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }
}
