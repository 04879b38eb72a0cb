//! Persistence seams. Each store is a trait with a Postgres implementation
//! and an in-memory one for tests and database-less runs.

pub mod account;
pub mod memory;
pub mod session;

use thiserror::Error;

pub use account::{AccountRepository, PgAccountRepository};
pub use memory::{InMemoryAccountRepository, InMemorySessionStore};
pub use session::{PgSessionStore, SessionStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("unique constraint violated")]
    Conflict,
    #[error("store call timed out")]
    Timeout,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(err),
        }
    }
}
