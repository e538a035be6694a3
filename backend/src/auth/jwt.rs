//! JWT token issuance and verification
//!
//! Access and refresh tokens share one claim shape and are told apart by
//! the signed `type` claim. Expiry is checked against the injected
//! [`Clock`] with zero leeway.

use crate::clock::Clock;
use anyhow::Result;
use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Token kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => f.write_str("access"),
            TokenKind::Refresh => f.write_str("refresh"),
        }
    }
}

/// JWT claims
///
/// Refresh tokens carry only `sub`; identity, role and permissions are
/// present on access tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    /// Unique per token, so two tokens issued in the same second differ
    pub jti: String,
}

/// Identity facts embedded into an access token
#[derive(Debug, Clone)]
pub struct ClaimsSeed {
    pub username: String,
    pub user_id: Uuid,
    pub role: String,
    pub permissions: Vec<String>,
}

/// Why a token was rejected. Diagnostics only; callers see "invalid token".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    Malformed,
    BadSignature,
    Expired,
    WrongKind { expected: TokenKind, actual: TokenKind },
}

/// Pre-computed JWT keys for efficient token operations
#[derive(Clone)]
pub struct JwtKeys {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
}

impl JwtKeys {
    /// Create new JWT keys from secret
    /// This should be called once at startup
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret.as_bytes())),
            decoding: Arc::new(DecodingKey::from_secret(secret.as_bytes())),
        }
    }
}

/// Token lifetimes
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,
}

/// JWT service for token operations
///
/// Stateless: nothing is stored server-side and no locking is involved.
/// Keys are wrapped in Arc for cheap cloning.
#[derive(Clone)]
pub struct JwtService {
    keys: JwtKeys,
    config: JwtConfig,
    validation: Arc<Validation>,
    clock: Arc<dyn Clock>,
}

impl JwtService {
    /// Create a new JWT service with pre-computed keys
    ///
    /// Call this once at application startup. Do NOT create per-request.
    pub fn new(
        secret: &str,
        access_token_expiry_secs: i64,
        refresh_token_expiry_secs: i64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `decode`
        validation.validate_exp = false;

        Self {
            keys: JwtKeys::new(secret),
            config: JwtConfig {
                access_token_expiry_secs,
                refresh_token_expiry_secs,
            },
            validation: Arc::new(validation),
            clock,
        }
    }

    /// Issue an access token carrying the full claim set
    pub fn issue_access(&self, seed: &ClaimsSeed) -> Result<String> {
        self.issue(
            seed.username.clone(),
            Some(seed.user_id.to_string()),
            Some(seed.role.clone()),
            seed.permissions.clone(),
            TokenKind::Access,
            self.config.access_token_expiry_secs,
        )
    }

    /// Issue a refresh token carrying only the subject
    pub fn issue_refresh(&self, username: &str) -> Result<String> {
        self.issue(
            username.to_string(),
            None,
            None,
            Vec::new(),
            TokenKind::Refresh,
            self.config.refresh_token_expiry_secs,
        )
    }

    fn issue(
        &self,
        sub: String,
        user_id: Option<String>,
        role: Option<String>,
        permissions: Vec<String>,
        kind: TokenKind,
        expiry_secs: i64,
    ) -> Result<String> {
        let now = self.clock.now();
        let exp = now + Duration::seconds(expiry_secs);

        let claims = Claims {
            sub,
            user_id,
            role,
            permissions,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            kind,
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.keys.encoding)
            .map_err(|e| anyhow::anyhow!("Failed to generate {} token: {}", kind, e))
    }

    /// Decode and check a token, reporting the precise rejection cause
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenRejection> {
        let data = decode::<Claims>(token, &self.keys.decoding, &self.validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::InvalidSignature => TokenRejection::BadSignature,
                _ => TokenRejection::Malformed,
            }
        })?;
        let claims = data.claims;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(TokenRejection::Expired);
        }
        if claims.kind != expected {
            return Err(TokenRejection::WrongKind {
                expected,
                actual: claims.kind,
            });
        }
        Ok(claims)
    }

    /// Verify a token of the expected kind.
    ///
    /// Every failure collapses to `None`; the cause is only logged.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Option<Claims> {
        match self.decode(token, expected) {
            Ok(claims) => Some(claims),
            Err(rejection) => {
                debug!(?rejection, expected = %expected, "Token rejected");
                metrics::counter!("auth_token_rejected_total", "kind" => expected.to_string())
                    .increment(1);
                None
            }
        }
    }

    /// Access token lifetime in seconds
    #[inline]
    pub fn access_token_expiry_secs(&self) -> i64 {
        self.config.access_token_expiry_secs
    }
}
