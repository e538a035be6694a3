//! PostgreSQL user store
//!
//! Lockout primitives are single conditional `UPDATE ... RETURNING`
//! statements. Postgres row locks serialise concurrent updates to the same
//! account and re-evaluate the `WHERE` clause against the committed row, so
//! no increment is lost.

use super::user::{
    FailedLoginOutcome, LockoutPolicy, NewUser, StoreResult, UserRecord, UserRepository,
    UserUpdate,
};
use crate::config::DatabaseConfig;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, full_name, is_active, \
     created_at, updated_at, last_login, failed_login_attempts, locked_until";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

/// What to do when the conditional failure update matched no row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnmatchedFailure {
    Missing,
    Locked(DateTime<Utc>),
    /// The lock was cleared or lapsed after the update ran; evaluate again
    Retry,
}

fn classify_unmatched(
    lock: Option<Option<DateTime<Utc>>>,
    now: DateTime<Utc>,
) -> UnmatchedFailure {
    match lock {
        None => UnmatchedFailure::Missing,
        Some(Some(until)) if now < until => UnmatchedFailure::Locked(until),
        Some(_) => UnmatchedFailure::Retry,
    }
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized from config. Acquisition is bounded so a saturated
    /// pool surfaces as a store error instead of hanging a login.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = PgConnectOptions::from_str(&config.url)?.application_name("hypertrader");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .test_before_acquire(true)
            .connect_with(options)
            .await?;

        info!(max_connections = config.max_connections, "User store pool created");
        Ok(Self::new(pool))
    }

    /// Apply the `users` table migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("User store migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query; backs `/health/ready`
    pub async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn count_failure(
        &self,
        id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FailedLoginOutcome>> {
        // Rows still locked at $2 are excluded; an expired lock restarts at 1.
        let updated = sqlx::query_as::<_, (i32, Option<DateTime<Utc>>)>(
            r#"
            UPDATE users SET
                failed_login_attempts = CASE
                    WHEN locked_until IS NOT NULL THEN 1
                    ELSE failed_login_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE WHEN locked_until IS NOT NULL THEN 1
                               ELSE failed_login_attempts + 1 END) >= $3
                    THEN $4::timestamptz
                    ELSE NULL
                END,
                updated_at = NOW()
            WHERE id = $1
              AND (locked_until IS NULL OR locked_until <= $2)
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(policy.threshold as i32)
        .bind(now + policy.duration)
        .fetch_optional(&self.pool)
        .await?;

        Ok(updated.map(|(attempts, locked_until)| match locked_until {
            Some(until) => FailedLoginOutcome::LockedNow { attempts, until },
            None => FailedLoginOutcome::Recorded { attempts },
        }))
    }

    async fn find_one(&self, column: &str, value: &str) -> StoreResult<Option<UserRecord>> {
        let sql = format!("SELECT {} FROM users WHERE {} = $1", USER_COLUMNS, column);
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        self.find_one("email", email).await
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert(&self, user: NewUser) -> StoreResult<UserRecord> {
        let sql = format!(
            r#"
            INSERT INTO users (username, email, password_hash, role, full_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.role)
            .bind(&user.full_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    async fn update(&self, id: Uuid, changes: UserUpdate) -> StoreResult<Option<UserRecord>> {
        let sql = format!(
            r#"
            UPDATE users SET
                email = COALESCE($2, email),
                password_hash = COALESCE($3, password_hash),
                role = COALESCE($4, role),
                full_name = COALESCE($5, full_name),
                is_active = COALESCE($6, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .bind(changes.email)
            .bind(changes.password_hash)
            .bind(changes.role)
            .bind(changes.full_name)
            .bind(changes.is_active)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn list(&self) -> StoreResult<Vec<UserRecord>> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at, username",
            USER_COLUMNS
        );
        let users = sqlx::query_as::<_, UserRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn any_with_role(&self, role: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(SELECT 1 FROM users WHERE role = $1)
            "#,
        )
        .bind(role)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FailedLoginOutcome>> {
        for _ in 0..2 {
            if let Some(outcome) = self.count_failure(id, policy, now).await? {
                return Ok(Some(outcome));
            }

            let lock = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
                "SELECT locked_until FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            match classify_unmatched(lock, now) {
                UnmatchedFailure::Missing => return Ok(None),
                UnmatchedFailure::Locked(until) => {
                    return Ok(Some(FailedLoginOutcome::AlreadyLocked { until }))
                }
                UnmatchedFailure::Retry => continue,
            }
        }

        // The row kept changing under us; refuse this attempt without counting it
        warn!(user_id = %id, "Failed-login update lost two races in a row");
        Ok(Some(FailedLoginOutcome::AlreadyLocked { until: now }))
    }

    async fn record_successful_login(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserRecord>> {
        let sql = format!(
            r#"
            UPDATE users SET
                failed_login_attempts = 0,
                locked_until = NULL,
                last_login = $2,
                updated_at = NOW()
            WHERE id = $1
              AND (locked_until IS NULL OR locked_until <= $2)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }
}
