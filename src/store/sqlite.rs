use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{
    CounterKey, CounterStore, IncrementOutcome, StoreResult, count_from_i64, limit_param,
};
use crate::{
    config::SqliteStorageConfig,
    models::{ActionKind, CounterRecord, Counters, Limit, Tier},
};

/// Counter columns in `ActionKind::ALL` order.
const COUNT_COLS: &str = "chat_query, portfolio_analysis, document_lookup, portfolio_change";

pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn from_config(cfg: &SqliteStorageConfig) -> StoreResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect_with(
                sqlx::sqlite::SqliteConnectOptions::new()
                    .filename(&cfg.path)
                    .create_if_missing(cfg.create_if_missing)
                    .journal_mode(if cfg.wal_mode {
                        sqlx::sqlite::SqliteJournalMode::Wal
                    } else {
                        sqlx::sqlite::SqliteJournalMode::Delete
                    })
                    .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
            )
            .await?;

        Ok(Self::new(pool))
    }

    /// Apply the bundled schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        tracing::info!("Running SQLite migrations");
        sqlx::migrate!("./migrations_sqlx/sqlite")
            .run(&self.pool)
            .await?;
        tracing::info!("SQLite migrations completed successfully");
        Ok(())
    }

    async fn current_count(&self, key: &CounterKey, action: ActionKind) -> StoreResult<u64> {
        let sql = format!(
            "SELECT COALESCE(SUM({col}), 0) AS total FROM usage_counters \
             WHERE user_id = ? AND period_kind = ? AND period_start = ? AND period_end = ?",
            col = action.column()
        );
        let total: i64 = sqlx::query_scalar(&sql)
            .bind(&key.user_id)
            .bind(key.period_kind().as_str())
            .bind(key.period.start_epoch())
            .bind(key.period.end_epoch())
            .fetch_one(&self.pool)
            .await?;
        count_from_i64(total, action.column())
    }
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    async fn read(&self, key: &CounterKey) -> StoreResult<Vec<CounterRecord>> {
        let sql = format!(
            "SELECT tier, {COUNT_COLS} FROM usage_counters \
             WHERE user_id = ? AND period_kind = ? AND period_start = ? AND period_end = ?"
        );
        let rows = sqlx::query(&sql)
            .bind(&key.user_id)
            .bind(key.period_kind().as_str())
            .bind(key.period.start_epoch())
            .bind(key.period.end_epoch())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let tier: Option<String> = row.get("tier");
                let mut counts = Counters::new();
                for action in ActionKind::ALL {
                    let value: i64 = row.get(action.column());
                    counts.set(action, count_from_i64(value, action.column())?);
                }
                Ok(CounterRecord {
                    user_id: key.user_id.clone(),
                    tier: tier.and_then(|t| t.parse().ok()),
                    period_kind: key.period_kind(),
                    period: key.period,
                    counts,
                })
            })
            .collect()
    }

    async fn increment_if_allowed(
        &self,
        key: &CounterKey,
        action: ActionKind,
        tier: Tier,
        limit: Limit,
    ) -> StoreResult<IncrementOutcome> {
        let limit = limit_param(limit);
        // The column name comes from a closed enum, never from input.
        let sql = format!(
            r#"
            INSERT INTO usage_counters (id, user_id, tier, period_kind, period_start, period_end, {col})
            SELECT ?, ?, ?, ?, ?, ?, 1
            WHERE ? IS NULL OR ? >= 1
            ON CONFLICT (user_id, period_kind, period_start, period_end)
            DO UPDATE SET {col} = {col} + 1, updated_at = CURRENT_TIMESTAMP
            WHERE ? IS NULL OR usage_counters.{col} < ?
            RETURNING {col}
            "#,
            col = action.column()
        );

        let updated: Option<i64> = sqlx::query_scalar(&sql)
            .bind(Uuid::new_v4().to_string())
            .bind(&key.user_id)
            .bind(tier.as_str())
            .bind(key.period_kind().as_str())
            .bind(key.period.start_epoch())
            .bind(key.period.end_epoch())
            .bind(limit)
            .bind(limit)
            .bind(limit)
            .bind(limit)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some(count) => Ok(IncrementOutcome {
                allowed: true,
                count: count_from_i64(count, action.column())?,
            }),
            None => Ok(IncrementOutcome {
                allowed: false,
                count: self.current_count(key, action).await?,
            }),
        }
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
