//! User record store
//!
//! The auth core reads and writes accounts only through [`UserRepository`].
//! Lockout bookkeeping goes through two dedicated primitives that each
//! implementation must apply atomically per record, so concurrent failed
//! logins cannot lose an increment.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hypertrader_shared::UserProfile;
use thiserror::Error;
use uuid::Uuid;

/// User record
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl UserRecord {
    /// Whether the account rejects all logins at `now`
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    /// Public view without the password digest or lockout internals
    pub fn to_profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.to_string(),
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            full_name: self.full_name.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// Input for creating a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub full_name: Option<String>,
}

/// Partial update; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<String>,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
}

/// Failed-attempt threshold and lock duration
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::minutes(15),
        }
    }
}

/// Result of recording one failed password check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedLoginOutcome {
    /// Counter incremented, account still usable
    Recorded { attempts: i32 },
    /// This failure reached the threshold and locked the account
    LockedNow { attempts: i32, until: DateTime<Utc> },
    /// The account was already locked; nothing changed
    AlreadyLocked { until: DateTime<Utc> },
}

/// Apply a failed login to a record in place.
///
/// A lock still in force is left untouched. An expired lock restarts the
/// count at one. Reaching the threshold sets `locked_until` in the same
/// step as the increment. Every implementation follows these rules.
pub fn apply_failed_login(
    user: &mut UserRecord,
    policy: LockoutPolicy,
    now: DateTime<Utc>,
) -> FailedLoginOutcome {
    if let Some(until) = user.locked_until {
        if now < until {
            return FailedLoginOutcome::AlreadyLocked { until };
        }
        user.failed_login_attempts = 0;
        user.locked_until = None;
    }

    user.failed_login_attempts += 1;
    user.updated_at = now;

    if user.failed_login_attempts as i64 >= policy.threshold as i64 {
        let until = now + policy.duration;
        user.locked_until = Some(until);
        FailedLoginOutcome::LockedNow {
            attempts: user.failed_login_attempts,
            until,
        }
    } else {
        FailedLoginOutcome::Recorded {
            attempts: user.failed_login_attempts,
        }
    }
}

/// Store failures. Never an authentication decision.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("user store unavailable: {0}")]
    Unavailable(String),

    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::Conflict(db_err.message().to_string());
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Account storage consumed by the auth core
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>>;

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<UserRecord>>;

    /// Insert a new active user with a clean lockout state.
    /// Fails with [`StoreError::Conflict`] on a duplicate username or email.
    async fn insert(&self, user: NewUser) -> StoreResult<UserRecord>;

    /// Apply a partial update and touch `updated_at`.
    /// Returns `None` when the user does not exist.
    async fn update(&self, id: Uuid, changes: UserUpdate) -> StoreResult<Option<UserRecord>>;

    /// Every account, oldest first
    async fn list(&self) -> StoreResult<Vec<UserRecord>>;

    /// Whether any account holds `role`
    async fn any_with_role(&self, role: &str) -> StoreResult<bool>;

    /// Atomically record a failed password check per [`apply_failed_login`].
    /// Returns `None` when the user does not exist.
    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FailedLoginOutcome>>;

    /// Atomically reset the lockout state and stamp `last_login`, but only
    /// if the account is not locked at `now`. `None` means it was locked
    /// (or no longer exists) and nothing changed.
    async fn record_successful_login(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserRecord>>;
}
