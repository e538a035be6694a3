//! Hypertrader Shared Library
//!
//! Types shared between the authentication backend and its clients:
//! roles and permissions, request/response shapes, the rejection taxonomy
//! and input validators.

pub mod errors;
pub mod permissions;
pub mod types;
pub mod validation;

// Re-export commonly used items
pub use errors::*;
pub use permissions::{permissions_for, Role};
pub use types::*;
