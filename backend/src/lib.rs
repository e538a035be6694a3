//! Hypertrader Backend Library
//!
//! Authentication core of the Hypertrader platform: credential hashing,
//! token issuance, rate limiting, role permissions and account lockout,
//! exposed over an Axum API.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
