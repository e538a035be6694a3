//! Sliding-window rate limiting for authentication endpoints
//!
//! Each key owns an ordered list of attempt timestamps. A check prunes
//! entries at or before `now - window`, rejects when the remaining count
//! has reached the budget, and otherwise records `now`.
//!
//! This is advisory throttling. [`InMemoryRateLimiter`] is process-local,
//! so with several instances the budget applies per instance; use
//! [`RedisRateLimiter`] for a shared budget.

use crate::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Rate-limit key for login attempts against one account
pub fn login_key(username: &str) -> String {
    format!("login_{}", username)
}

/// Rate-limit key shared by all registrations
pub const REGISTER_KEY: &str = "register";

/// Sliding-window attempt counter keyed by arbitrary strings
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record an attempt for `key` if fewer than `max_attempts` happened
    /// within the trailing `window`. Returns whether the attempt is allowed.
    async fn allow(&self, key: &str, max_attempts: u32, window: Duration) -> bool;
}

/// How often idle keys are swept out of the in-memory map
const SWEEP_INTERVAL_SECS: i64 = 60;

/// Attempts recorded for one key, with the window they were checked against
#[derive(Debug)]
struct AttemptWindow {
    attempts: VecDeque<DateTime<Utc>>,
    span: Duration,
}

impl AttemptWindow {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.attempts.front().is_some_and(|t| *t <= cutoff) {
            self.attempts.pop_front();
        }
    }

    /// Whether any recorded attempt still counts at `now`
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.attempts.back().is_some_and(|t| *t > now - self.span)
    }
}

/// Process-local rate limiter
///
/// A key's window is updated under its DashMap shard lock, so keys on
/// other shards never wait on each other. Keys whose attempts have all
/// aged out are swept at most once per [`SWEEP_INTERVAL_SECS`], which keeps
/// memory bounded by the keys active within the longest window.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    windows: Arc<DashMap<String, AttemptWindow>>,
    next_sweep: Arc<Mutex<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryRateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let next_sweep = clock.now() + Duration::seconds(SWEEP_INTERVAL_SECS);
        Self {
            windows: Arc::new(DashMap::new()),
            next_sweep: Arc::new(Mutex::new(next_sweep)),
            clock,
        }
    }

    /// Attempts currently counted against `key` (without pruning)
    pub fn recorded(&self, key: &str) -> usize {
        self.windows
            .get(key)
            .map(|w| w.attempts.len())
            .unwrap_or(0)
    }

    /// Number of keys currently held in memory
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn sweep_if_due(&self, now: DateTime<Utc>) {
        {
            let mut next = self.next_sweep.lock();
            if now < *next {
                return;
            }
            *next = now + Duration::seconds(SWEEP_INTERVAL_SECS);
        }
        let before = self.windows.len();
        self.windows.retain(|_, w| w.is_live(now));
        debug!(
            swept = before.saturating_sub(self.windows.len()),
            "Pruned idle rate-limit keys"
        );
    }

    fn check(&self, key: &str, max_attempts: u32, window: Duration) -> bool {
        let now = self.clock.now();
        self.sweep_if_due(now);

        let mut entry = match self.windows.get_mut(key) {
            Some(entry) => entry,
            None => self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| AttemptWindow {
                    attempts: VecDeque::new(),
                    span: window,
                }),
        };
        entry.span = entry.span.max(window);
        entry.prune(now - window);

        if entry.attempts.len() >= max_attempts as usize {
            return false;
        }
        entry.attempts.push_back(now);
        true
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn allow(&self, key: &str, max_attempts: u32, window: Duration) -> bool {
        let allowed = self.check(key, max_attempts, window);
        if !allowed {
            warn!(key = %key, max_attempts, "Rate limit exceeded");
        }
        allowed
    }
}

/// Prune, count and append in one round trip so concurrent callers on
/// different instances cannot interleave.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local cutoff = tonumber(ARGV[2])
local max_attempts = tonumber(ARGV[3])
local member = ARGV[4]
local ttl_ms = tonumber(ARGV[5])
redis.call('ZREMRANGEBYSCORE', key, '-inf', cutoff)
if redis.call('ZCARD', key) >= max_attempts then
  return 0
end
redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, ttl_ms)
return 1
"#;

/// Rate limiter backed by a Redis sorted set per key
///
/// Redis errors fail open: throttling is advisory and an outage must not
/// lock every user out.
#[derive(Clone)]
pub struct RedisRateLimiter {
    conn: ConnectionManager,
    script: Arc<redis::Script>,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl RedisRateLimiter {
    pub fn new(conn: ConnectionManager, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn,
            script: Arc::new(redis::Script::new(SLIDING_WINDOW_SCRIPT)),
            prefix: "ratelimit:".to_string(),
            clock,
        }
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str, max_attempts: u32, window: Duration) -> bool {
        let now = self.clock.now().timestamp_millis();
        let cutoff = now - window.num_milliseconds();
        let mut conn = self.conn.clone();

        let result: redis::RedisResult<i32> = self
            .script
            .key(format!("{}{}", self.prefix, key))
            .arg(now)
            .arg(cutoff)
            .arg(max_attempts)
            .arg(format!("{}-{}", now, Uuid::new_v4()))
            .arg(window.num_milliseconds().max(1))
            .invoke_async(&mut conn)
            .await;

        match result {
            Ok(1) => true,
            Ok(_) => {
                warn!(key = %key, max_attempts, "Rate limit exceeded");
                false
            }
            Err(e) => {
                warn!(error = %e, key = %key, "Redis rate limiter unavailable, allowing attempt");
                true
            }
        }
    }
}
