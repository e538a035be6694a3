//! In-memory user store
//!
//! Every mutation runs under one write lock, which makes the lockout
//! primitives atomic per record. Suitable for development and tests.

use super::user::{
    apply_failed_login, FailedLoginOutcome, LockoutPolicy, NewUser, StoreError, StoreResult,
    UserRecord, UserRepository, UserUpdate,
};
use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<Uuid, UserRecord>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryUserRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }

    fn find_by<F>(&self, pred: F) -> Option<UserRecord>
    where
        F: Fn(&UserRecord) -> bool,
    {
        self.users.read().values().find(|u| pred(u)).cloned()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.find_by(|u| u.username == username))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.find_by(|u| u.email == email))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn insert(&self, user: NewUser) -> StoreResult<UserRecord> {
        let now = self.clock.now();
        let mut users = self.users.write();

        if users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(StoreError::Conflict("username or email".to_string()));
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            full_name: user.full_name,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login: None,
            failed_login_attempts: 0,
            locked_until: None,
        };
        users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, id: Uuid, changes: UserUpdate) -> StoreResult<Option<UserRecord>> {
        let now = self.clock.now();
        let mut users = self.users.write();

        if let Some(email) = &changes.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Conflict("email".to_string()));
            }
        }

        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(role) = changes.role {
            user.role = role;
        }
        if let Some(full_name) = changes.full_name {
            user.full_name = Some(full_name);
        }
        if let Some(active) = changes.is_active {
            user.is_active = active;
        }
        user.updated_at = now;
        Ok(Some(user.clone()))
    }

    async fn list(&self) -> StoreResult<Vec<UserRecord>> {
        let mut users: Vec<UserRecord> = self.users.read().values().cloned().collect();
        users.sort_by_key(|u| (u.created_at, u.username.clone()));
        Ok(users)
    }

    async fn any_with_role(&self, role: &str) -> StoreResult<bool> {
        Ok(self.users.read().values().any(|u| u.role == role))
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<FailedLoginOutcome>> {
        let mut users = self.users.write();
        Ok(users
            .get_mut(&id)
            .map(|user| apply_failed_login(user, policy, now)))
    }

    async fn record_successful_login(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UserRecord>> {
        let mut users = self.users.write();
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if user.is_locked_at(now) {
            return Ok(None);
        }
        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.last_login = Some(now);
        user.updated_at = now;
        Ok(Some(user.clone()))
    }
}
