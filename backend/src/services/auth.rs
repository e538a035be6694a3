//! Authentication service
//!
//! Composes the user store, password hashing, rate limiting and token
//! issuance into registration, login with account lockout, token refresh
//! and current-user resolution.
//!
//! Lockout states per account:
//! - **Active**: a failed password check increments the counter; reaching
//!   the threshold sets `locked_until` in the same atomic store update.
//! - **Locked** (`now < locked_until`): every attempt is rejected with
//!   [`AuthError::AccountLocked`], the counter is left alone.
//! - Once `now >= locked_until` the next attempt is evaluated normally.
//!   Only a successful password check resets the counter.
//!
//! # Performance
//!
//! Password hashing and verification run on the blocking thread pool.
//! Store calls are bounded by the configured timeout and surface as
//! [`AuthError::ServiceUnavailable`] when they fail.

use crate::auth::jwt::{Claims, ClaimsSeed, JwtService, TokenKind};
use crate::auth::password::{Credentials, PasswordService};
use crate::auth::permissions::{require_permission, require_role};
use crate::auth::rate_limit::{login_key, RateLimiter, REGISTER_KEY};
use crate::clock::Clock;
use crate::config::{AppConfig, BootstrapConfig};
use crate::repositories::{
    FailedLoginOutcome, LockoutPolicy, NewUser, StoreError, StoreResult, UserRecord,
    UserRepository, UserUpdate,
};
use chrono::{DateTime, Duration, Utc};
use hypertrader_shared::permissions::{self, permissions_for};
use hypertrader_shared::{validation, AuthError, AuthTokens, RegisterRequest, Role};
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::ValidateEmail;

/// Attempt budget for one rate-limit scope
#[derive(Debug, Clone, Copy)]
pub struct AttemptBudget {
    pub max_attempts: u32,
    pub window: Duration,
}

/// Tunables for [`AuthService`]
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub lockout: LockoutPolicy,
    pub login_budget: AttemptBudget,
    pub register_budget: AttemptBudget,
    pub store_timeout: std::time::Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            lockout: LockoutPolicy::default(),
            login_budget: AttemptBudget {
                max_attempts: 5,
                window: Duration::minutes(15),
            },
            register_budget: AttemptBudget {
                max_attempts: 5,
                window: Duration::minutes(60),
            },
            store_timeout: std::time::Duration::from_secs(5),
        }
    }
}

impl AuthSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            lockout: LockoutPolicy {
                threshold: config.security.lockout_threshold,
                duration: Duration::seconds(config.security.lockout_duration_secs),
            },
            login_budget: AttemptBudget {
                max_attempts: config.rate_limit.login_max_attempts,
                window: Duration::seconds(config.rate_limit.login_window_secs),
            },
            register_budget: AttemptBudget {
                max_attempts: config.rate_limit.register_max_attempts,
                window: Duration::seconds(config.rate_limit.register_window_secs),
            },
            store_timeout: config.security.store_timeout(),
        }
    }
}

/// An account resolved from a bearer token, with the token's claims
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: UserRecord,
    pub claims: Claims,
}

/// Authentication orchestrator
///
/// Cheap to clone; every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    limiter: Arc<dyn RateLimiter>,
    jwt: JwtService,
    passwords: PasswordService,
    clock: Arc<dyn Clock>,
    settings: AuthSettings,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        limiter: Arc<dyn RateLimiter>,
        jwt: JwtService,
        passwords: PasswordService,
        clock: Arc<dyn Clock>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            users,
            limiter,
            jwt,
            passwords,
            clock,
            settings,
        }
    }

    /// Build the service and its token/password collaborators from config
    pub fn from_config(
        config: &AppConfig,
        users: Arc<dyn UserRepository>,
        limiter: Arc<dyn RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let jwt = JwtService::new(
            &config.jwt.secret,
            config.jwt.access_token_expiry_secs,
            config.jwt.refresh_token_expiry_secs,
            clock.clone(),
        );
        let passwords = PasswordService::from_config(&config.security);
        Self::new(
            users,
            limiter,
            jwt,
            passwords,
            clock,
            AuthSettings::from_config(config),
        )
    }

    #[inline]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    #[inline]
    pub fn users(&self) -> &Arc<dyn UserRepository> {
        &self.users
    }

    /// Run a store call under the store timeout, translating failures
    async fn store<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.settings.store_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(StoreError::Conflict(detail))) => {
                debug!(%detail, "Unique constraint rejected write");
                Err(AuthError::DuplicateAccount)
            }
            Ok(Err(StoreError::Unavailable(detail))) => {
                error!(%detail, "User store unavailable");
                Err(AuthError::ServiceUnavailable(
                    "user store unavailable".to_string(),
                ))
            }
            Err(_) => {
                error!(timeout = ?self.settings.store_timeout, "User store timed out");
                Err(AuthError::ServiceUnavailable("user store timed out".to_string()))
            }
        }
    }

    /// Register a new account.
    ///
    /// Checks, in order: password strength, username and email shape, role,
    /// then uniqueness. Duplicate username and duplicate email are reported
    /// the same way.
    pub async fn register(&self, req: RegisterRequest) -> Result<UserRecord, AuthError> {
        PasswordService::check_strength(&req.password)?;
        validation::validate_username(&req.username).map_err(AuthError::InvalidInput)?;
        if !req.email.validate_email() {
            return Err(AuthError::InvalidInput("Invalid email format".to_string()));
        }
        let role = match req.role.as_deref() {
            None => Role::default(),
            Some(raw) => raw
                .parse::<Role>()
                .map_err(|_| AuthError::InvalidRole(raw.to_string()))?,
        };

        let user = self
            .create_user(req.username, req.email, req.password, role, req.full_name)
            .await?;
        info!(user_id = %user.id, username = %user.username, role = %user.role, "User registered");
        Ok(user)
    }

    /// [`register`](Self::register) behind the global registration budget
    pub async fn register_with_limit(&self, req: RegisterRequest) -> Result<UserRecord, AuthError> {
        let budget = self.settings.register_budget;
        if !self
            .limiter
            .allow(REGISTER_KEY, budget.max_attempts, budget.window)
            .await
        {
            metrics::counter!("auth_rate_limited_total", "scope" => "register").increment(1);
            return Err(AuthError::RateLimited);
        }
        self.register(req).await
    }

    async fn create_user(
        &self,
        username: String,
        email: String,
        password: String,
        role: Role,
        full_name: Option<String>,
    ) -> Result<UserRecord, AuthError> {
        if self.store(self.users.find_by_username(&username)).await?.is_some()
            || self.store(self.users.find_by_email(&email)).await?.is_some()
        {
            return Err(AuthError::DuplicateAccount);
        }

        let password_hash = self.hash(password).await?;

        self.store(self.users.insert(NewUser {
            username,
            email,
            password_hash,
            role: role.to_string(),
            full_name,
        }))
        .await
    }

    async fn hash(&self, password: String) -> Result<String, AuthError> {
        self.passwords.hash_async(password).await.map_err(|e| {
            error!(error = %e, "Password hashing failed");
            AuthError::ServiceUnavailable("password hashing unavailable".to_string())
        })
    }

    /// Check credentials and apply the lockout state machine.
    ///
    /// Unknown user and wrong password both yield
    /// [`AuthError::InvalidCredentials`].
    pub async fn authenticate(&self, credentials: Credentials) -> Result<UserRecord, AuthError> {
        let Some(user) = self
            .store(self.users.find_by_username(&credentials.username))
            .await?
        else {
            self.passwords.verify_decoy(credentials.password).await;
            metrics::counter!("auth_login_failure_total", "reason" => "invalid_credentials")
                .increment(1);
            debug!(username = %credentials.username, "Login for unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        let now = self.clock.now();
        if let Some(until) = user.locked_until.filter(|until| now < *until) {
            metrics::counter!("auth_login_failure_total", "reason" => "locked").increment(1);
            return Err(self.locked(until));
        }
        if !user.is_active {
            metrics::counter!("auth_login_failure_total", "reason" => "deactivated").increment(1);
            return Err(AuthError::AccountDeactivated);
        }

        let valid =
            PasswordService::verify_async(credentials.password, user.password_hash.clone()).await;
        if !valid {
            return self.reject_wrong_password(&user).await;
        }

        match self
            .store(self.users.record_successful_login(user.id, self.clock.now()))
            .await?
        {
            Some(user) => {
                metrics::counter!("auth_login_success_total").increment(1);
                info!(user_id = %user.id, username = %user.username, "Login succeeded");
                Ok(user)
            }
            // Locked by a concurrent failure between our read and write
            None => match self.store(self.users.find_by_id(user.id)).await? {
                Some(current) => match current.locked_until {
                    Some(until) => Err(self.locked(until)),
                    None => Err(AuthError::InvalidCredentials),
                },
                None => Err(AuthError::InvalidCredentials),
            },
        }
    }

    fn locked(&self, until: DateTime<Utc>) -> AuthError {
        AuthError::AccountLocked {
            until,
            retry_after_secs: (until - self.clock.now()).num_seconds().max(1),
        }
    }

    async fn reject_wrong_password(&self, user: &UserRecord) -> Result<UserRecord, AuthError> {
        let outcome = self
            .store(self.users.record_failed_login(
                user.id,
                self.settings.lockout,
                self.clock.now(),
            ))
            .await?;

        match outcome {
            Some(FailedLoginOutcome::AlreadyLocked { until }) => {
                metrics::counter!("auth_login_failure_total", "reason" => "locked").increment(1);
                Err(self.locked(until))
            }
            Some(FailedLoginOutcome::LockedNow { attempts, until }) => {
                metrics::counter!("auth_login_failure_total", "reason" => "invalid_credentials")
                    .increment(1);
                metrics::counter!("auth_lockouts_total").increment(1);
                warn!(
                    user_id = %user.id,
                    username = %user.username,
                    attempts,
                    %until,
                    "Account locked after repeated failed logins"
                );
                Err(AuthError::InvalidCredentials)
            }
            Some(FailedLoginOutcome::Recorded { attempts }) => {
                metrics::counter!("auth_login_failure_total", "reason" => "invalid_credentials")
                    .increment(1);
                debug!(user_id = %user.id, attempts, "Wrong password");
                Err(AuthError::InvalidCredentials)
            }
            None => Err(AuthError::InvalidCredentials),
        }
    }

    /// Issue an access/refresh pair for an account.
    ///
    /// Permissions are derived from the account's current role.
    pub fn issue_token_pair(&self, user: &UserRecord) -> Result<AuthTokens, AuthError> {
        let seed = ClaimsSeed {
            username: user.username.clone(),
            user_id: user.id,
            role: user.role.clone(),
            permissions: permissions_for(&user.role),
        };

        let signing_failed = |e: anyhow::Error| {
            error!(error = %e, "Token signing failed");
            AuthError::ServiceUnavailable("token signing unavailable".to_string())
        };
        let access_token = self.jwt.issue_access(&seed).map_err(signing_failed)?;
        let refresh_token = self
            .jwt
            .issue_refresh(&user.username)
            .map_err(signing_failed)?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
            expires_in: self.jwt.access_token_expiry_secs(),
        })
    }

    /// Rate-limited login: budget check, authentication, token issuance
    pub async fn login(&self, credentials: Credentials) -> Result<AuthTokens, AuthError> {
        let budget = self.settings.login_budget;
        if !self
            .limiter
            .allow(
                &login_key(&credentials.username),
                budget.max_attempts,
                budget.window,
            )
            .await
        {
            metrics::counter!("auth_rate_limited_total", "scope" => "login").increment(1);
            return Err(AuthError::RateLimited);
        }

        let user = self.authenticate(credentials).await?;
        self.issue_token_pair(&user)
    }

    /// Exchange a refresh token for a fresh pair.
    ///
    /// The account is re-read so deactivation since issuance is caught, and
    /// permissions come from its current role.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let claims = self
            .jwt
            .verify(refresh_token, TokenKind::Refresh)
            .ok_or(AuthError::InvalidToken)?;

        let user = self
            .store(self.users.find_by_username(&claims.sub))
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            debug!(user_id = %user.id, "Refresh for deactivated account");
            return Err(AuthError::InvalidToken);
        }

        self.issue_token_pair(&user)
    }

    /// Resolve the account behind an access token
    pub async fn resolve_current_user(
        &self,
        access_token: &str,
    ) -> Result<AuthenticatedUser, AuthError> {
        let claims = self
            .jwt
            .verify(access_token, TokenKind::Access)
            .ok_or(AuthError::InvalidToken)?;

        let user = self
            .store(self.users.find_by_username(&claims.sub))
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if claims.user_id.as_deref() != Some(user.id.to_string().as_str()) {
            warn!(username = %claims.sub, "Access token subject does not match account id");
            return Err(AuthError::InvalidToken);
        }
        if !user.is_active {
            return Err(AuthError::AccountDeactivated);
        }

        Ok(AuthenticatedUser { user, claims })
    }

    /// Change a user's password after re-checking the current one
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: SecretString,
        new_password: SecretString,
    ) -> Result<(), AuthError> {
        let user = self
            .store(self.users.find_by_id(user_id))
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !PasswordService::verify_async(current_password, user.password_hash.clone()).await {
            return Err(AuthError::InvalidCredentials);
        }
        PasswordService::check_strength(new_password.expose_secret())?;

        let password_hash = self.hash(new_password.expose_secret().clone()).await?;
        self.store(self.users.update(
            user_id,
            UserUpdate {
                password_hash: Some(password_hash),
                ..Default::default()
            },
        ))
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    /// Activate or deactivate an account. Requires `manage:users`.
    ///
    /// Returns `None` when the account does not exist.
    pub async fn set_active(
        &self,
        actor: &Claims,
        user_id: Uuid,
        active: bool,
    ) -> Result<Option<UserRecord>, AuthError> {
        require_permission(actor, permissions::MANAGE_USERS)?;

        let updated = self
            .store(self.users.update(
                user_id,
                UserUpdate {
                    is_active: Some(active),
                    ..Default::default()
                },
            ))
            .await?;

        if let Some(user) = &updated {
            info!(
                actor = %actor.sub,
                user_id = %user.id,
                active,
                "Account activation changed"
            );
        }
        Ok(updated)
    }

    /// All accounts. Admin only.
    pub async fn list_users(&self, actor: &Claims) -> Result<Vec<UserRecord>, AuthError> {
        require_role(actor, Role::Admin)?;
        self.store(self.users.list()).await
    }

    /// Create the configured administrator when no admin account exists
    pub async fn ensure_bootstrap_admin(
        &self,
        bootstrap: &BootstrapConfig,
    ) -> Result<Option<UserRecord>, AuthError> {
        if bootstrap.admin_password.is_empty() {
            return Ok(None);
        }
        if self
            .store(self.users.any_with_role(Role::Admin.as_str()))
            .await?
        {
            return Ok(None);
        }

        PasswordService::check_strength(&bootstrap.admin_password)?;
        let admin = self
            .create_user(
                bootstrap.admin_username.clone(),
                bootstrap.admin_email.clone(),
                bootstrap.admin_password.clone(),
                Role::Admin,
                Some("System Administrator".to_string()),
            )
            .await?;
        info!(username = %admin.username, "Bootstrap admin account created");
        Ok(Some(admin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::rate_limit::InMemoryRateLimiter;
    use crate::clock::ManualClock;
    use crate::config::PasswordAlgorithm;
    use crate::repositories::InMemoryUserRepository;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    struct Harness {
        service: AuthService,
        users: InMemoryUserRepository,
        clock: ManualClock,
    }

    fn harness() -> Harness {
        let clock = ManualClock::default();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let users = InMemoryUserRepository::new(shared_clock.clone());
        let service = AuthService::new(
            Arc::new(users.clone()),
            Arc::new(InMemoryRateLimiter::new(shared_clock.clone())),
            JwtService::new("test-secret", 1800, 604800, shared_clock.clone()),
            PasswordService::new(PasswordAlgorithm::Bcrypt, 4),
            shared_clock,
            AuthSettings::default(),
        );
        Harness {
            service,
            users,
            clock,
        }
    }

    fn register_request(username: &str, role: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password: "TestPass123!".to_string(),
            role: role.map(str::to_string),
            full_name: None,
        }
    }

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials {
            username: username.to_string(),
            password: SecretString::new(password.to_string()),
        }
    }

    #[tokio::test]
    async fn test_register_defaults_to_trader() {
        let h = harness();
        let user = h.service.register(register_request("alice", None)).await.unwrap();

        assert_eq!(user.role, "trader");
        assert!(user.is_active);
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.locked_until.is_none());
        assert_ne!(user.password_hash, "TestPass123!");
    }

    #[tokio::test]
    async fn test_register_rejections() {
        let h = harness();
        h.service.register(register_request("alice", None)).await.unwrap();

        let mut weak = register_request("bob", None);
        weak.password = "weakpass".into();
        assert!(matches!(
            h.service.register(weak).await,
            Err(AuthError::WeakPassword(_))
        ));

        assert_eq!(
            h.service.register(register_request("carol", Some("root"))).await.unwrap_err(),
            AuthError::InvalidRole("root".into())
        );

        assert_eq!(
            h.service.register(register_request("alice", None)).await.unwrap_err(),
            AuthError::DuplicateAccount
        );

        let mut same_email = register_request("dave", None);
        same_email.email = "alice@example.com".into();
        assert_eq!(
            h.service.register(same_email).await.unwrap_err(),
            AuthError::DuplicateAccount
        );

        let mut bad_email = register_request("erin", None);
        bad_email.email = "not-an-email".into();
        assert!(matches!(
            h.service.register(bad_email).await,
            Err(AuthError::InvalidInput(_))
        ));

        assert_eq!(h.users.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_and_wrong_password_look_the_same() {
        let h = harness();
        h.service.register(register_request("alice", None)).await.unwrap();

        let unknown = h.service.authenticate(creds("nobody", "TestPass123!")).await;
        let wrong = h.service.authenticate(creds("alice", "WrongPass123!")).await;

        assert_eq!(unknown.unwrap_err(), AuthError::InvalidCredentials);
        assert_eq!(wrong.unwrap_err(), AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_lockout_after_five_failures() {
        let h = harness();
        h.service.register(register_request("alice", None)).await.unwrap();

        for _ in 0..5 {
            assert_eq!(
                h.service
                    .authenticate(creds("alice", "WrongPass123!"))
                    .await
                    .unwrap_err(),
                AuthError::InvalidCredentials
            );
        }

        let locked = h.service.authenticate(creds("alice", "TestPass123!")).await;
        assert!(matches!(
            locked,
            Err(AuthError::AccountLocked {
                retry_after_secs: 900,
                ..
            })
        ));

        let stored = h.users.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(stored.failed_login_attempts, 5);

        // Remaining wait follows the service clock, not wall time
        h.clock.advance(Duration::minutes(10));
        let locked = h.service.authenticate(creds("alice", "TestPass123!")).await;
        assert!(matches!(
            locked,
            Err(AuthError::AccountLocked {
                retry_after_secs: 300,
                ..
            })
        ));

        h.clock.advance(Duration::minutes(5));
        let user = h
            .service
            .authenticate(creds("alice", "TestPass123!"))
            .await
            .unwrap();
        assert_eq!(user.failed_login_attempts, 0);
        assert!(user.locked_until.is_none());
        assert_eq!(user.last_login, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let h = harness();
        h.service.register(register_request("alice", None)).await.unwrap();

        for _ in 0..3 {
            let _ = h.service.authenticate(creds("alice", "WrongPass123!")).await;
        }
        let user = h
            .service
            .authenticate(creds("alice", "TestPass123!"))
            .await
            .unwrap();
        assert_eq!(user.failed_login_attempts, 0);

        // Counter restarted: four more failures do not lock
        for _ in 0..4 {
            let _ = h.service.authenticate(creds("alice", "WrongPass123!")).await;
        }
        assert!(h.service.authenticate(creds("alice", "TestPass123!")).await.is_ok());
    }

    #[tokio::test]
    async fn test_deactivated_account_rejected_after_lock_check() {
        let h = harness();
        let user = h.service.register(register_request("alice", None)).await.unwrap();
        h.users
            .update(
                user.id,
                UserUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(
            h.service
                .authenticate(creds("alice", "TestPass123!"))
                .await
                .unwrap_err(),
            AuthError::AccountDeactivated
        );
    }

    #[tokio::test]
    async fn test_token_pair_claims() {
        let h = harness();
        let user = h.service.register(register_request("alice", None)).await.unwrap();
        let tokens = h.service.issue_token_pair(&user).unwrap();

        assert_eq!(tokens.token_type, "bearer");
        assert_eq!(tokens.expires_in, 1800);

        let access = h.service.jwt().verify(&tokens.access_token, TokenKind::Access).unwrap();
        assert_eq!(access.sub, "alice");
        assert_eq!(access.permissions, permissions_for("trader"));

        let refresh = h.service.jwt().verify(&tokens.refresh_token, TokenKind::Refresh).unwrap();
        assert!(refresh.permissions.is_empty());
        assert!(refresh.role.is_none());

        // A refresh token never resolves a user
        assert_eq!(
            h.service
                .resolve_current_user(&tokens.refresh_token)
                .await
                .unwrap_err(),
            AuthError::InvalidToken
        );
        // An access token never refreshes
        assert_eq!(
            h.service.refresh(&tokens.access_token).await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    #[tokio::test]
    async fn test_refresh_uses_current_role() {
        let h = harness();
        let user = h.service.register(register_request("alice", Some("viewer"))).await.unwrap();
        let tokens = h.service.issue_token_pair(&user).unwrap();

        h.users
            .update(
                user.id,
                UserUpdate {
                    role: Some("trader".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let refreshed = h.service.refresh(&tokens.refresh_token).await.unwrap();
        let resolved = h
            .service
            .resolve_current_user(&refreshed.access_token)
            .await
            .unwrap();
        assert_eq!(resolved.claims.role.as_deref(), Some("trader"));
        assert!(resolved.claims.has_permission(permissions::EXECUTE_TRADES));
    }

    #[tokio::test]
    async fn test_login_is_rate_limited_per_username() {
        let h = harness();
        h.service.register(register_request("alice", None)).await.unwrap();
        h.service.register(register_request("bob", None)).await.unwrap();

        for _ in 0..5 {
            assert!(h.service.login(creds("alice", "TestPass123!")).await.is_ok());
        }
        assert_eq!(
            h.service.login(creds("alice", "TestPass123!")).await.unwrap_err(),
            AuthError::RateLimited
        );
        assert!(h.service.login(creds("bob", "TestPass123!")).await.is_ok());
    }

    #[tokio::test]
    async fn test_registration_budget_is_global() {
        let h = harness();
        for i in 0..5 {
            h.service
                .register_with_limit(register_request(&format!("user{}", i), None))
                .await
                .unwrap();
        }
        assert_eq!(
            h.service
                .register_with_limit(register_request("user5", None))
                .await
                .unwrap_err(),
            AuthError::RateLimited
        );
    }

    #[tokio::test]
    async fn test_change_password() {
        let h = harness();
        let user = h.service.register(register_request("alice", None)).await.unwrap();

        let wrong_current = h
            .service
            .change_password(
                user.id,
                SecretString::new("Nope1234!".into()),
                SecretString::new("NewPass456!".into()),
            )
            .await;
        assert_eq!(wrong_current.unwrap_err(), AuthError::InvalidCredentials);

        let weak_new = h
            .service
            .change_password(
                user.id,
                SecretString::new("TestPass123!".into()),
                SecretString::new("short".into()),
            )
            .await;
        assert!(matches!(weak_new, Err(AuthError::WeakPassword(_))));

        h.service
            .change_password(
                user.id,
                SecretString::new("TestPass123!".into()),
                SecretString::new("NewPass456!".into()),
            )
            .await
            .unwrap();

        assert!(h.service.authenticate(creds("alice", "TestPass123!")).await.is_err());
        assert!(h.service.authenticate(creds("alice", "NewPass456!")).await.is_ok());
    }

    #[tokio::test]
    async fn test_set_active_requires_manage_users() {
        let h = harness();
        let admin = h.service.register(register_request("root", Some("admin"))).await.unwrap();
        let trader = h.service.register(register_request("alice", None)).await.unwrap();

        let trader_claims = h
            .service
            .resolve_current_user(&h.service.issue_token_pair(&trader).unwrap().access_token)
            .await
            .unwrap()
            .claims;
        assert!(matches!(
            h.service.set_active(&trader_claims, admin.id, false).await,
            Err(AuthError::Forbidden(_))
        ));

        let admin_claims = h
            .service
            .resolve_current_user(&h.service.issue_token_pair(&admin).unwrap().access_token)
            .await
            .unwrap()
            .claims;
        let updated = h
            .service
            .set_active(&admin_claims, trader.id, false)
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.is_active);
        assert!(h
            .service
            .set_active(&admin_claims, Uuid::new_v4(), false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_users_is_admin_only() {
        let h = harness();
        let admin = h.service.register(register_request("root", Some("admin"))).await.unwrap();
        let trader = h.service.register(register_request("alice", None)).await.unwrap();

        let claims_of = |user: &UserRecord| {
            let token = h.service.issue_token_pair(user).unwrap().access_token;
            h.service.jwt().verify(&token, TokenKind::Access).unwrap()
        };

        assert!(matches!(
            h.service.list_users(&claims_of(&trader)).await,
            Err(AuthError::Forbidden(_))
        ));

        let users = h.service.list_users(&claims_of(&admin)).await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn test_bootstrap_admin_created_once() {
        let h = harness();
        let bootstrap = BootstrapConfig {
            admin_password: "Admin123!".to_string(),
            ..Default::default()
        };

        let created = h.service.ensure_bootstrap_admin(&bootstrap).await.unwrap();
        assert_eq!(created.unwrap().role, "admin");
        assert!(h.service.ensure_bootstrap_admin(&bootstrap).await.unwrap().is_none());

        let disabled = BootstrapConfig::default();
        assert!(h.service.ensure_bootstrap_admin(&disabled).await.unwrap().is_none());
    }

    /// Store whose every call fails, to check infrastructure errors are not
    /// reported as credential failures.
    struct DownStore;

    #[async_trait]
    impl UserRepository for DownStore {
        async fn find_by_username(&self, _: &str) -> StoreResult<Option<UserRecord>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn find_by_email(&self, _: &str) -> StoreResult<Option<UserRecord>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn find_by_id(&self, _: Uuid) -> StoreResult<Option<UserRecord>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn insert(&self, _: NewUser) -> StoreResult<UserRecord> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn update(&self, _: Uuid, _: UserUpdate) -> StoreResult<Option<UserRecord>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn list(&self) -> StoreResult<Vec<UserRecord>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn any_with_role(&self, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn record_failed_login(
            &self,
            _: Uuid,
            _: LockoutPolicy,
            _: DateTime<Utc>,
        ) -> StoreResult<Option<FailedLoginOutcome>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn record_successful_login(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
        ) -> StoreResult<Option<UserRecord>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_is_service_unavailable() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let service = AuthService::new(
            Arc::new(DownStore),
            Arc::new(InMemoryRateLimiter::new(clock.clone())),
            JwtService::new("test-secret", 1800, 604800, clock.clone()),
            PasswordService::new(PasswordAlgorithm::Bcrypt, 4),
            clock,
            AuthSettings::default(),
        );

        let err = service.authenticate(creds("alice", "TestPass123!")).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
        assert!(err.is_retryable());

        let err = service.register(register_request("alice", None)).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
    }

    const STALL: std::time::Duration = std::time::Duration::from_secs(2);

    /// Store that answers only after `STALL`; lookups succeed if awaited
    struct SlowStore;

    async fn stall<T>(value: T) -> StoreResult<T> {
        tokio::time::sleep(STALL).await;
        Ok(value)
    }

    #[async_trait]
    impl UserRepository for SlowStore {
        async fn find_by_username(&self, _: &str) -> StoreResult<Option<UserRecord>> {
            stall(None).await
        }
        async fn find_by_email(&self, _: &str) -> StoreResult<Option<UserRecord>> {
            stall(None).await
        }
        async fn find_by_id(&self, _: Uuid) -> StoreResult<Option<UserRecord>> {
            stall(None).await
        }
        async fn insert(&self, _: NewUser) -> StoreResult<UserRecord> {
            tokio::time::sleep(STALL).await;
            Err(StoreError::Unavailable("answered too late".into()))
        }
        async fn update(&self, _: Uuid, _: UserUpdate) -> StoreResult<Option<UserRecord>> {
            stall(None).await
        }
        async fn list(&self) -> StoreResult<Vec<UserRecord>> {
            stall(Vec::new()).await
        }
        async fn any_with_role(&self, _: &str) -> StoreResult<bool> {
            stall(false).await
        }
        async fn record_failed_login(
            &self,
            _: Uuid,
            _: LockoutPolicy,
            _: DateTime<Utc>,
        ) -> StoreResult<Option<FailedLoginOutcome>> {
            stall(None).await
        }
        async fn record_successful_login(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
        ) -> StoreResult<Option<UserRecord>> {
            stall(None).await
        }
    }

    #[tokio::test]
    async fn test_slow_store_times_out_as_service_unavailable() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let service = AuthService::new(
            Arc::new(SlowStore),
            Arc::new(InMemoryRateLimiter::new(clock.clone())),
            JwtService::new("test-secret", 1800, 604800, clock.clone()),
            PasswordService::new(PasswordAlgorithm::Bcrypt, 4),
            clock,
            AuthSettings {
                store_timeout: std::time::Duration::from_millis(20),
                ..AuthSettings::default()
            },
        );

        let started = std::time::Instant::now();
        // A completed lookup would report InvalidCredentials for the unknown user
        let err = service.authenticate(creds("alice", "TestPass123!")).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
        assert!(err.is_retryable());
        assert!(started.elapsed() < STALL);

        let err = service.register(register_request("alice", None)).await.unwrap_err();
        assert!(matches!(err, AuthError::ServiceUnavailable(_)));
    }
}
