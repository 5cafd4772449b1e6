//! Per-user usage counters.
//!
//! A [`CounterStore`] backend persists one counter record per user and
//! accounting window and performs the conditional increment as a single
//! atomic step. [`UsageStore`] wraps a backend with the limit catalog, the
//! clock and the failure policy, and is what the rest of the crate talks to.
//!
//! Backends:
//! - [`MemoryCounterStore`]: single process, always available
//! - `SqliteCounterStore` (feature `database-sqlite`)
//! - `PostgresCounterStore` (feature `database-postgres`)
//! - `RedisCounterStore` (feature `redis`)

mod error;
mod keys;
mod memory;
#[cfg(feature = "database-postgres")]
mod postgres;
#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "database-sqlite")]
mod sqlite;
mod usage;

#[cfg(test)]
pub(crate) mod tests;

use std::sync::Arc;

use async_trait::async_trait;
pub use error::{StoreError, StoreResult, UnknownAction};
pub use keys::CounterKeys;
pub use memory::MemoryCounterStore;
#[cfg(feature = "database-postgres")]
pub use postgres::PostgresCounterStore;
#[cfg(feature = "redis")]
pub use redis::RedisCounterStore;
#[cfg(feature = "database-sqlite")]
pub use sqlite::SqliteCounterStore;
pub use usage::{Admission, UsageStore};

pub use crate::config::FailurePolicy;
use crate::{
    config::StorageConfig,
    models::{ActionKind, CounterRecord, Limit, PeriodKind, Tier},
    period::Period,
};

/// Identifies one canonical accounting window of one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub user_id: String,
    pub period: Period,
}

impl CounterKey {
    pub fn new(user_id: impl Into<String>, period: Period) -> Self {
        Self {
            user_id: user_id.into(),
            period,
        }
    }

    pub fn period_kind(&self) -> PeriodKind {
        self.period.kind
    }

    /// Canonical string form, shared by key-value backends.
    pub fn canonical(&self) -> String {
        CounterKeys::window(&self.user_id, &self.period)
    }
}

/// Result of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// The increment was applied.
    pub allowed: bool,
    /// Count for the action after the operation: the new value when allowed,
    /// the unchanged current value when denied.
    ///
    /// Informational only. SQL backends read the denied count with a second
    /// query after the atomic statement, so under concurrent traffic it may
    /// differ from the count that caused the denial. Admission never depends
    /// on it.
    pub count: u64,
}

/// Storage backend for usage counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Every physical record stored for the window. Normally zero or one;
    /// more means duplicates the caller must sum.
    async fn read(&self, key: &CounterKey) -> StoreResult<Vec<CounterRecord>>;

    /// Atomically add one to `action` if the new count stays within `limit`.
    ///
    /// Creates the record on first use, snapshotting `tier` onto it. An
    /// unbounded limit always increments. Check and write happen as one step
    /// in the backend so concurrent callers can never both take the last slot.
    async fn increment_if_allowed(
        &self,
        key: &CounterKey,
        action: ActionKind,
        tier: Tier,
        limit: Limit,
    ) -> StoreResult<IncrementOutcome>;

    /// Short backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> StoreResult<()>;
}

/// Bounded limit as a database parameter; `None` means unbounded.
#[cfg(any(feature = "database-sqlite", feature = "database-postgres"))]
pub(crate) fn limit_param(limit: Limit) -> Option<i64> {
    limit
        .as_bounded()
        .map(|n| i64::try_from(n).unwrap_or(i64::MAX))
}

/// Convert a stored integer count, rejecting negatives.
#[cfg(any(
    feature = "database-sqlite",
    feature = "database-postgres",
    feature = "redis"
))]
pub(crate) fn count_from_i64(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("negative count {} in {}", value, column)))
}

/// Build the configured backend, running migrations where requested.
pub async fn from_config(config: &StorageConfig) -> StoreResult<Arc<dyn CounterStore>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!(
                "Using in-memory counter storage; usage is lost on restart and not shared between instances"
            );
            Ok(Arc::new(MemoryCounterStore::new()))
        }
        #[cfg(feature = "database-sqlite")]
        StorageConfig::Sqlite(cfg) => {
            let store = SqliteCounterStore::from_config(cfg).await?;
            if cfg.run_migrations {
                store.run_migrations().await?;
            }
            Ok(Arc::new(store))
        }
        #[cfg(feature = "database-postgres")]
        StorageConfig::Postgres(cfg) => {
            let store = PostgresCounterStore::from_config(cfg).await?;
            if cfg.run_migrations {
                store.run_migrations().await?;
            }
            Ok(Arc::new(store))
        }
        #[cfg(feature = "redis")]
        StorageConfig::Redis(cfg) => Ok(Arc::new(RedisCounterStore::from_config(cfg).await?)),
    }
}

/// Apply schema migrations for SQL backends. Returns `false` when the
/// configured backend has no schema.
pub async fn run_migrations(config: &StorageConfig) -> StoreResult<bool> {
    match config {
        #[cfg(feature = "database-sqlite")]
        StorageConfig::Sqlite(cfg) => {
            SqliteCounterStore::from_config(cfg)
                .await?
                .run_migrations()
                .await?;
            Ok(true)
        }
        #[cfg(feature = "database-postgres")]
        StorageConfig::Postgres(cfg) => {
            PostgresCounterStore::from_config(cfg)
                .await?
                .run_migrations()
                .await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
