use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{
    CounterKey, CounterStore, IncrementOutcome, StoreResult, count_from_i64, limit_param,
};
use crate::{
    config::PostgresStorageConfig,
    models::{ActionKind, CounterRecord, Counters, Limit, Tier},
};

const COUNT_COLS: &str = "chat_query, portfolio_analysis, document_lookup, portfolio_change";

pub struct PostgresCounterStore {
    pool: PgPool,
}

impl PostgresCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn from_config(cfg: &PostgresStorageConfig) -> StoreResult<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .min_connections(cfg.min_connections)
            .max_connections(cfg.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(cfg.connect_timeout_secs))
            .connect(&cfg.url)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        tracing::info!("Running PostgreSQL migrations");
        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(&self.pool)
            .await?;
        tracing::info!("PostgreSQL migrations completed successfully");
        Ok(())
    }

    async fn current_count(&self, key: &CounterKey, action: ActionKind) -> StoreResult<u64> {
        let sql = format!(
            "SELECT COALESCE(SUM({col}), 0)::BIGINT AS total FROM usage_counters \
             WHERE user_id = $1 AND period_kind = $2 AND period_start = $3 AND period_end = $4",
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
impl CounterStore for PostgresCounterStore {
    async fn read(&self, key: &CounterKey) -> StoreResult<Vec<CounterRecord>> {
        let sql = format!(
            "SELECT tier, {COUNT_COLS} FROM usage_counters \
             WHERE user_id = $1 AND period_kind = $2 AND period_start = $3 AND period_end = $4"
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
        // The column name comes from a closed enum, never from input.
        let sql = format!(
            r#"
            INSERT INTO usage_counters (id, user_id, tier, period_kind, period_start, period_end, {col})
            SELECT $1, $2, $3, $4, $5, $6, 1
            WHERE $7::BIGINT IS NULL OR $7::BIGINT >= 1
            ON CONFLICT (user_id, period_kind, period_start, period_end)
            DO UPDATE SET {col} = usage_counters.{col} + 1, updated_at = NOW()
            WHERE $7::BIGINT IS NULL OR usage_counters.{col} < $7::BIGINT
            RETURNING {col}
            "#,
            col = action.column()
        );

        let updated: Option<i64> = sqlx::query_scalar(&sql)
            .bind(Uuid::new_v4())
            .bind(&key.user_id)
            .bind(tier.as_str())
            .bind(key.period_kind().as_str())
            .bind(key.period.start_epoch())
            .bind(key.period.end_epoch())
            .bind(limit_param(limit))
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
        "postgres"
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
