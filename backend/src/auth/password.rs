//! Password hashing and strength policy
//!
//! New digests use the configured algorithm (bcrypt with a tunable cost,
//! or Argon2id). Verification dispatches on the digest prefix, so stored
//! digests of either algorithm keep working after the setting changes.
//!
//! # Performance Considerations
//!
//! Both algorithms are intentionally CPU-intensive. Async callers should
//! use the `_async` variants, which run on the blocking thread pool.

use crate::config::{PasswordAlgorithm, SecurityConfig};
use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use hypertrader_shared::{validation, AuthError, LoginRequest};
use secrecy::{ExposeSecret, SecretString};
use tracing::{error, warn};

/// Plaintext username/password pair. Lives only for one verify call.
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl From<LoginRequest> for Credentials {
    fn from(req: LoginRequest) -> Self {
        Self {
            username: req.username,
            password: SecretString::new(req.password),
        }
    }
}

/// Password hashing service
///
/// Cheap to clone; holds a pre-computed decoy digest used to equalise
/// timing when a login names an unknown user.
#[derive(Clone)]
pub struct PasswordService {
    algorithm: PasswordAlgorithm,
    bcrypt_cost: u32,
    decoy: Option<String>,
}

impl PasswordService {
    pub fn new(algorithm: PasswordAlgorithm, bcrypt_cost: u32) -> Self {
        let mut service = Self {
            algorithm,
            bcrypt_cost,
            decoy: None,
        };
        service.decoy = service.hash("decoy-password-for-timing").ok();
        service
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.password_algorithm, config.bcrypt_cost)
    }

    /// Hash a password with a fresh random salt (blocking operation)
    pub fn hash(&self, password: &str) -> Result<String> {
        match self.algorithm {
            PasswordAlgorithm::Bcrypt => bcrypt::hash(password, self.bcrypt_cost)
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e)),
            PasswordAlgorithm::Argon2 => {
                let salt = SaltString::generate(&mut OsRng);
                let hash = Argon2::default()
                    .hash_password(password.as_bytes(), &salt)
                    .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
                Ok(hash.to_string())
            }
        }
    }

    /// Hash a password on the blocking thread pool
    pub async fn hash_async(&self, password: String) -> Result<String> {
        let service = self.clone();
        tokio::task::spawn_blocking(move || service.hash(&password))
            .await
            .map_err(|e| anyhow::anyhow!("Task join error: {}", e))?
    }

    /// Verify a password against a stored digest (blocking operation)
    ///
    /// Never fails: a malformed digest or verifier error is logged and
    /// treated as a mismatch.
    pub fn verify(password: &str, digest: &str) -> bool {
        if digest.starts_with("$argon2") {
            let parsed = match PasswordHash::new(digest) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(error = %e, "Malformed argon2 password digest");
                    return false;
                }
            };
            return Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok();
        }

        if digest.starts_with("$2") {
            return match bcrypt::verify(password, digest) {
                Ok(valid) => valid,
                Err(e) => {
                    warn!(error = %e, "Password verification error");
                    false
                }
            };
        }

        warn!("Password digest has an unrecognised format");
        false
    }

    /// Verify a password on the blocking thread pool
    pub async fn verify_async(password: SecretString, digest: String) -> bool {
        tokio::task::spawn_blocking(move || Self::verify(password.expose_secret(), &digest))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "Password verification task failed");
                false
            })
    }

    /// Burn roughly one verification worth of CPU; the result is discarded.
    pub async fn verify_decoy(&self, password: SecretString) {
        if let Some(decoy) = &self.decoy {
            let _ = Self::verify_async(password, decoy.clone()).await;
        }
    }

    /// Whether a password satisfies the strength policy
    pub fn meets_strength_policy(password: &str) -> bool {
        validation::validate_password_strength(password).is_ok()
    }

    /// Strength policy as a typed rejection
    pub fn check_strength(password: &str) -> Result<(), AuthError> {
        validation::validate_password_strength(password).map_err(AuthError::WeakPassword)
    }
}
