//! Business logic services
//!
//! Services coordinate repositories, credential hashing, rate limiting
//! and token issuance.

pub mod auth;

pub use auth::{AttemptBudget, AuthService, AuthSettings, AuthenticatedUser};
