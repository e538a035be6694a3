//! User record repositories
//!
//! The auth core depends on the [`UserRepository`] trait; Postgres backs it
//! in production and an in-memory map backs it in development and tests.

pub mod memory;
pub mod postgres;
pub mod user;

pub use memory::InMemoryUserRepository;
pub use postgres::PgUserRepository;
pub use user::{
    FailedLoginOutcome, LockoutPolicy, NewUser, StoreError, StoreResult, UserRecord,
    UserRepository, UserUpdate,
};
