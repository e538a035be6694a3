//! Hypertrader Backend
//!
//! Authentication service for the Hypertrader trading platform.
//!
//! ## Architecture
//!
//! - Routes: HTTP request handling and routing
//! - Services: registration, login with lockout, token refresh
//! - Repositories: user store (PostgreSQL, or in-memory when no database URL is set)
//! - Auth: hashing, tokens, rate limiting, permissions

use anyhow::Result;
use hypertrader_backend::{
    auth::{InMemoryRateLimiter, RateLimiter, RedisRateLimiter},
    clock::{Clock, SystemClock},
    config::{self, RateLimitBackend},
    repositories::{InMemoryUserRepository, PgUserRepository, UserRepository},
    routes,
    services::AuthService,
    state::AppState,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let config = config::AppConfig::load()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        env = if config::AppConfig::is_production() { "production" } else { "development" },
        "Starting Hypertrader backend"
    );

    if config::AppConfig::is_production() {
        validate_production_config(&config)?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (users, postgres) = connect_user_store(&config, clock.clone()).await?;
    let limiter = build_rate_limiter(&config, clock.clone()).await;

    let auth = AuthService::from_config(&config, users, limiter, clock);

    if let Some(admin) = auth.ensure_bootstrap_admin(&config.bootstrap).await? {
        warn!(username = %admin.username, "Bootstrap admin created; rotate its password");
    }

    let mut state = AppState::new(config.clone(), auth);
    if let Some(store) = postgres {
        state = state.with_postgres(store);
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }

    let app = routes::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(address = %addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Postgres when a database URL is configured, otherwise the in-memory store
async fn connect_user_store(
    config: &config::AppConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn UserRepository>, Option<PgUserRepository>)> {
    if config.database.url.is_empty() {
        if config::AppConfig::is_production() {
            anyhow::bail!("A database URL is required in production");
        }
        warn!("No database URL configured; accounts live in memory only");
        return Ok((Arc::new(InMemoryUserRepository::new(clock)), None));
    }

    info!("Connecting to database...");
    let store = PgUserRepository::connect(&config.database).await?;

    // Production runs migrations as a separate job
    if !config::AppConfig::is_production() {
        store.migrate().await?;
    }

    Ok((Arc::new(store.clone()), Some(store)))
}

/// Select the rate limiter backend, falling back to in-memory if Redis is unreachable
async fn build_rate_limiter(config: &config::AppConfig, clock: Arc<dyn Clock>) -> Arc<dyn RateLimiter> {
    if config.rate_limit.backend == RateLimitBackend::Redis {
        if let Some(conn) = connect_redis(&config.redis.url).await {
            return Arc::new(RedisRateLimiter::new(conn, clock));
        }
        warn!("Rate limiting falls back to per-instance memory");
    }
    Arc::new(InMemoryRateLimiter::new(clock))
}

/// Connect to Redis with graceful fallback
async fn connect_redis(url: &str) -> Option<ConnectionManager> {
    info!("Connecting to Redis...");

    match redis::Client::open(url) {
        Ok(client) => match ConnectionManager::new(client).await {
            Ok(conn) => {
                info!("Redis connection established");
                Some(conn)
            }
            Err(e) => {
                warn!("Failed to connect to Redis: {}", e);
                None
            }
        },
        Err(e) => {
            warn!("Invalid Redis URL: {}", e);
            None
        }
    }
}

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config::AppConfig::is_production() {
            "hypertrader_backend=info,tower_http=info".into()
        } else {
            "hypertrader_backend=debug,tower_http=debug,sqlx=warn".into()
        }
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if config::AppConfig::is_production() {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

/// Refuse to start in production with unsafe settings
fn validate_production_config(config: &config::AppConfig) -> Result<()> {
    let problems = config.production_problems();

    if config.database.url.contains("localhost") || config.database.url.contains("127.0.0.1") {
        warn!("Database URL contains localhost - ensure this is intentional for production");
    }

    if !problems.is_empty() {
        for problem in &problems {
            error!("Configuration error: {}", problem);
        }
        anyhow::bail!("Invalid production configuration");
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
