//! Configuration management for the Hypertrader auth backend
//!
//! Configuration is loaded hierarchically:
//! 1. Default values (in code)
//! 2. TOML config files (config/development.toml or config/production.toml)
//! 3. Environment variables (prefix: HT__)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
///
/// An empty `url` selects the in-memory user store (development only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// JWT configuration
///
/// The secret is read once at start-up; there is no hot rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expiry_secs: i64,
    pub refresh_token_expiry_secs: i64,
}

/// Password hashing algorithm used for new digests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PasswordAlgorithm {
    Bcrypt,
    Argon2,
}

/// Credential and lockout policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub password_algorithm: PasswordAlgorithm,
    pub bcrypt_cost: u32,
    pub lockout_threshold: u32,
    pub lockout_duration_secs: i64,
    pub store_timeout_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            password_algorithm: PasswordAlgorithm::Bcrypt,
            bcrypt_cost: 12,
            lockout_threshold: 5,
            lockout_duration_secs: 900, // 15 minutes
            store_timeout_ms: 5000,
        }
    }
}

impl SecurityConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

/// Where rate-limit windows are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Process-local; budgets are per instance
    Memory,
    /// Shared across instances
    Redis,
}

/// Rate-limit budgets for the auth endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    pub login_max_attempts: u32,
    pub login_window_secs: i64,
    pub register_max_attempts: u32,
    pub register_window_secs: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Memory,
            login_max_attempts: 5,
            login_window_secs: 900,     // 15 minutes
            register_max_attempts: 5,
            register_window_secs: 3600, // 1 hour
        }
    }
}

/// Initial administrator account, created when no admin exists.
/// An empty password disables bootstrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_email: String,
    pub admin_password: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
            admin_email: "admin@hypertrader.com".to_string(),
            admin_password: String::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                acquire_timeout_secs: 5,
            },
            redis: RedisConfig {
                url: "redis://localhost:6379".to_string(),
            },
            jwt: JwtConfig {
                secret: "development-secret-change-in-production".to_string(),
                access_token_expiry_secs: 1800,      // 30 minutes
                refresh_token_expiry_secs: 604800,   // 7 days
            },
            security: SecurityConfig::default(),
            rate_limit: RateLimitConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    ///
    /// Loading order (later sources override earlier):
    /// 1. Default values
    /// 2. Config file based on RUST_ENV (development.toml or production.toml)
    /// 3. Environment variables with HT__ prefix
    pub fn load() -> Result<Self> {
        let env = env::var("RUST_ENV").unwrap_or_else(|_| "development".to_string());
        let config_file = format!("config/{}.toml", env);

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(
                config::File::with_name(&config_file)
                    .required(false)
            )
            // e.g., HT__JWT__SECRET=... sets jwt.secret
            .add_source(
                config::Environment::with_prefix("HT")
                    .separator("__")
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check if running in production mode
    pub fn is_production() -> bool {
        env::var("RUST_ENV")
            .map(|v| v == "production")
            .unwrap_or(false)
    }

    /// Problems that make this configuration unfit for production
    pub fn production_problems(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        if self.jwt.secret.contains("development") || self.jwt.secret.len() < 32 {
            problems.push("JWT secret must be at least 32 characters and not contain 'development'");
        }
        if self.database.url.is_empty() {
            problems.push("A database URL is required in production");
        }
        if self.security.lockout_threshold == 0 {
            problems.push("Lockout threshold must be at least 1");
        }
        if self.security.password_algorithm == PasswordAlgorithm::Bcrypt
            && self.security.bcrypt_cost < 10
        {
            problems.push("bcrypt cost below 10 is too cheap for production");
        }
        problems
    }
}
