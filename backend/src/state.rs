//! Application state management
//!
//! Shared state passed to all request handlers via Axum's state extraction.
//! Everything inside is created once at startup and cheap to clone.

use crate::config::AppConfig;
use crate::repositories::PgUserRepository;
use crate::services::AuthService;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared application state
///
/// # Performance
///
/// - `config`: wrapped in Arc, cloning is O(1)
/// - `auth`: every collaborator is behind an Arc, cloning is O(1)
/// - `postgres`: wraps an internally Arc'd pool; `None` when running on the in-memory store
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: AuthService,
    pub postgres: Option<PgUserRepository>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: AppConfig, auth: AuthService) -> Self {
        Self {
            config: Arc::new(config),
            auth,
            postgres: None,
            metrics: None,
        }
    }

    /// Attach the Postgres store checked by `/health/ready`
    pub fn with_postgres(mut self, store: PgUserRepository) -> Self {
        self.postgres = Some(store);
        self
    }

    /// Attach the Prometheus handle rendered at `/metrics`
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[inline]
    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    #[inline]
    pub fn postgres(&self) -> Option<&PgUserRepository> {
        self.postgres.as_ref()
    }
}
