//! Authentication module
//!
//! Password hashing, JWT issuance and verification, sliding-window rate
//! limiting and permission gates.

pub mod jwt;
mod middleware;
pub mod password;
pub mod permissions;
pub mod rate_limit;

pub use jwt::{Claims, ClaimsSeed, JwtService, TokenKind, TokenRejection};
pub use middleware::AuthUser;
pub use password::{Credentials, PasswordService};
pub use permissions::{require_permission, require_role};
pub use rate_limit::{InMemoryRateLimiter, RateLimiter, RedisRateLimiter};
