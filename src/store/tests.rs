//! Shared behavior checks every counter backend must pass, plus harness
//! helpers for the database and Redis backends.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::{CounterKey, CounterStore, IncrementOutcome, StoreError, StoreResult};
use crate::{
    models::{ActionKind, CounterRecord, Limit, PeriodKind, Tier},
    period::current_period,
};

/// Backend whose every call fails, for exercising the failure policy.
pub struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn read(&self, _key: &CounterKey) -> StoreResult<Vec<CounterRecord>> {
        Err(StoreError::Internal("connection refused".into()))
    }

    async fn increment_if_allowed(
        &self,
        _key: &CounterKey,
        _action: ActionKind,
        _tier: Tier,
        _limit: Limit,
    ) -> StoreResult<IncrementOutcome> {
        Err(StoreError::Internal("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "unavailable"
    }

    async fn health_check(&self) -> StoreResult<()> {
        Err(StoreError::Internal("connection refused".into()))
    }
}

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
}

fn key(user: &str, kind: PeriodKind, now: DateTime<Utc>) -> CounterKey {
    CounterKey::new(user, current_period(kind, now))
}

fn total(records: &[CounterRecord], action: ActionKind) -> u64 {
    CounterRecord::fold(records).counts.get(action)
}

/// Run the sequential checks against one backend instance.
pub async fn run_all(store: &dyn CounterStore) {
    read_of_untouched_window_is_empty(store).await;
    first_increment_creates_record(store).await;
    bounded_limit_stops_at_limit(store).await;
    unbounded_limit_always_increments(store).await;
    actions_count_independently(store).await;
    windows_are_isolated(store).await;
    zero_limit_never_admits(store).await;
    long_user_ids_are_counted(store).await;
    store.health_check().await.expect("health check");
}

/// User ids are opaque; length must not turn into a store error.
async fn long_user_ids_are_counted(store: &dyn CounterStore) {
    let user_id = format!("conf-long-{}", "x".repeat(300));
    let key = key(&user_id, PeriodKind::Daily, at());
    for expected in 1..=2 {
        let outcome = store
            .increment_if_allowed(&key, ActionKind::ChatQuery, Tier::Free, Limit::Bounded(2))
            .await
            .unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.count, expected);
    }
    let denied = store
        .increment_if_allowed(&key, ActionKind::ChatQuery, Tier::Free, Limit::Bounded(2))
        .await
        .unwrap();
    assert!(!denied.allowed, "{}: long id must still be limited", store.backend_name());

    let records = store.read(&key).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].user_id, user_id);
}

async fn read_of_untouched_window_is_empty(store: &dyn CounterStore) {
    let records = store
        .read(&key("conf-empty", PeriodKind::Daily, at()))
        .await
        .unwrap();
    assert!(records.is_empty(), "{}: expected no records", store.backend_name());
}

async fn first_increment_creates_record(store: &dyn CounterStore) {
    let key = key("conf-create", PeriodKind::Daily, at());
    let outcome = store
        .increment_if_allowed(&key, ActionKind::ChatQuery, Tier::Pro, Limit::Bounded(5))
        .await
        .unwrap();
    assert!(outcome.allowed);
    assert_eq!(outcome.count, 1);

    let records = store.read(&key).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.user_id, "conf-create");
    assert_eq!(record.tier, Some(Tier::Pro));
    assert_eq!(record.period_kind, PeriodKind::Daily);
    assert_eq!(record.period, key.period);
    assert_eq!(record.counts.get(ActionKind::ChatQuery), 1);
    assert_eq!(record.counts.get(ActionKind::DocumentLookup), 0);
}

async fn bounded_limit_stops_at_limit(store: &dyn CounterStore) {
    let key = key("conf-bounded", PeriodKind::Daily, at());
    for expected in 1..=3 {
        let outcome = store
            .increment_if_allowed(&key, ActionKind::PortfolioAnalysis, Tier::Free, Limit::Bounded(3))
            .await
            .unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.count, expected);
    }

    let denied = store
        .increment_if_allowed(&key, ActionKind::PortfolioAnalysis, Tier::Free, Limit::Bounded(3))
        .await
        .unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.count, 3);

    let records = store.read(&key).await.unwrap();
    assert_eq!(total(&records, ActionKind::PortfolioAnalysis), 3);
}

async fn unbounded_limit_always_increments(store: &dyn CounterStore) {
    let key = key("conf-unbounded", PeriodKind::Daily, at());
    for _ in 0..50 {
        let outcome = store
            .increment_if_allowed(&key, ActionKind::ChatQuery, Tier::Premium, Limit::Unbounded)
            .await
            .unwrap();
        assert!(outcome.allowed);
    }
    let records = store.read(&key).await.unwrap();
    assert_eq!(total(&records, ActionKind::ChatQuery), 50);
}

async fn actions_count_independently(store: &dyn CounterStore) {
    let key = key("conf-actions", PeriodKind::Monthly, at());
    for _ in 0..2 {
        store
            .increment_if_allowed(&key, ActionKind::DocumentLookup, Tier::Free, Limit::Bounded(10))
            .await
            .unwrap();
    }
    store
        .increment_if_allowed(&key, ActionKind::PortfolioChange, Tier::Free, Limit::Bounded(5))
        .await
        .unwrap();

    let records = store.read(&key).await.unwrap();
    assert_eq!(records.len(), 1, "one record holds every action of the window");
    assert_eq!(total(&records, ActionKind::DocumentLookup), 2);
    assert_eq!(total(&records, ActionKind::PortfolioChange), 1);
    assert_eq!(total(&records, ActionKind::ChatQuery), 0);
}

async fn windows_are_isolated(store: &dyn CounterStore) {
    let today = key("conf-windows", PeriodKind::Daily, at());
    let tomorrow = key(
        "conf-windows",
        PeriodKind::Daily,
        at() + chrono::Duration::days(1),
    );
    let month = key("conf-windows", PeriodKind::Monthly, at());
    let other_user = key("conf-windows-other", PeriodKind::Daily, at());

    store
        .increment_if_allowed(&today, ActionKind::ChatQuery, Tier::Free, Limit::Bounded(1))
        .await
        .unwrap();

    let denied = store
        .increment_if_allowed(&today, ActionKind::ChatQuery, Tier::Free, Limit::Bounded(1))
        .await
        .unwrap();
    assert!(!denied.allowed);

    for other in [&tomorrow, &month, &other_user] {
        let outcome = store
            .increment_if_allowed(other, ActionKind::ChatQuery, Tier::Free, Limit::Bounded(1))
            .await
            .unwrap();
        assert!(outcome.allowed, "{:?} should start from zero", other);
        assert_eq!(outcome.count, 1);
    }
}

async fn zero_limit_never_admits(store: &dyn CounterStore) {
    let key = key("conf-zero", PeriodKind::Daily, at());
    let outcome = store
        .increment_if_allowed(&key, ActionKind::ChatQuery, Tier::Free, Limit::Bounded(0))
        .await
        .unwrap();
    assert!(!outcome.allowed);
    assert_eq!(outcome.count, 0);
    let records = store.read(&key).await.unwrap();
    assert_eq!(total(&records, ActionKind::ChatQuery), 0);
}

/// Many tasks race for a limit of 20: exactly 20 win and none are lost.
pub async fn concurrent_increments_respect_limit(store: Arc<dyn CounterStore>) {
    const LIMIT: u64 = 20;
    const TASKS: usize = 60;

    let key = key("conf-race", PeriodKind::Daily, at());

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .increment_if_allowed(
                        &key,
                        ActionKind::ChatQuery,
                        Tier::Free,
                        Limit::Bounded(LIMIT),
                    )
                    .await
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let allowed = results
        .into_iter()
        .map(|r| r.expect("task panicked").expect("increment failed"))
        .filter(|o| o.allowed)
        .count();

    assert_eq!(allowed as u64, LIMIT, "exactly the limit must be admitted");
    let records = store.read(&key).await.unwrap();
    assert_eq!(total(&records, ActionKind::ChatQuery), LIMIT);
}

/// Concurrent unbounded increments: every one is counted.
pub async fn concurrent_unbounded_increments_are_not_lost(store: Arc<dyn CounterStore>) {
    const TASKS: u64 = 100;

    let key = key("conf-no-loss", PeriodKind::Monthly, at());

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let store = Arc::clone(&store);
            let key = key.clone();
            tokio::spawn(async move {
                store
                    .increment_if_allowed(
                        &key,
                        ActionKind::DocumentLookup,
                        Tier::Premium,
                        Limit::Unbounded,
                    )
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        assert!(result.expect("task panicked").expect("increment failed").allowed);
    }

    let records = store.read(&key).await.unwrap();
    assert_eq!(total(&records, ActionKind::DocumentLookup), TASKS);
}

/// Create an in-memory SQLite pool with real migrations applied.
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(&pool)
        .await
        .expect("Failed to run SQLite migrations");
    pool
}

/// PostgreSQL test harness using testcontainers
#[cfg(feature = "database-postgres")]
pub mod postgres {
    use std::sync::OnceLock;

    use sqlx::PgPool;
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    struct SharedContainer {
        #[allow(dead_code)] // keeps the container alive
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    static SHARED_CONTAINER: OnceLock<OnceCell<SharedContainer>> = OnceLock::new();

    async fn get_shared_container() -> &'static SharedContainer {
        let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
        cell.get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("18-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            SharedContainer {
                container,
                connection_string: format!(
                    "postgres://postgres:postgres@{}:{}/postgres",
                    host, port
                ),
            }
        })
        .await
    }

    /// Pool bound to a fresh schema with migrations applied.
    pub async fn create_isolated_pool() -> PgPool {
        let shared = get_shared_container().await;

        let admin_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&shared.connection_string)
            .await
            .expect("Failed to connect to PostgreSQL");

        let schema_name = format!("test_{}", uuid::Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA \"{}\"", schema_name))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test schema");

        let isolated_url = format!(
            "{}?options=-c search_path={}",
            shared.connection_string, schema_name
        );
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&isolated_url)
            .await
            .expect("Failed to connect to isolated schema");

        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(&pool)
            .await
            .expect("Failed to run PostgreSQL migrations");
        pool
    }
}

/// Redis test harness using testcontainers
#[cfg(feature = "redis")]
pub mod redis {
    use testcontainers_modules::{
        redis::Redis,
        testcontainers::{ContainerAsync, runners::AsyncRunner},
    };

    /// Start a Redis container; it lives as long as the returned handle.
    pub async fn create_redis_container() -> (String, ContainerAsync<Redis>) {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get port");

        (format!("redis://{}:{}", host, port), container)
    }
}
