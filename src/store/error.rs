use thiserror::Error;

use crate::models::{ActionKind, Tier};

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Counter update failed under contention: {0}")]
    Contention(String),

    #[error("Corrupt counter record: {0}")]
    Corrupt(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The action has no limit configured for the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown_action: '{action}' is not metered for tier '{tier}'")]
pub struct UnknownAction {
    pub action: ActionKind,
    pub tier: Tier,
}
