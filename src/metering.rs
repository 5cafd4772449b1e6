//! Wiring from a loaded [`TiergateConfig`] to ready-to-use services.

use std::sync::Arc;

use crate::{
    catalog::StaticLimitCatalog,
    config::TiergateConfig,
    engine::QuotaEngine,
    period::{Clock, SystemClock},
    reporting::UsageReporter,
    store::{self, CounterStore, StoreResult, UsageStore},
};

/// The enforcement and reporting services sharing one counter store.
#[derive(Clone)]
pub struct Metering {
    store: Arc<UsageStore>,
    engine: QuotaEngine,
    reporter: Arc<UsageReporter>,
}

impl Metering {
    /// Connect the configured backend and assemble the services.
    pub async fn from_config(config: &TiergateConfig) -> StoreResult<Self> {
        let backend = store::from_config(&config.storage).await?;
        Ok(Self::with_backend(config, backend, Arc::new(SystemClock)))
    }

    /// Assemble the services over an existing backend and clock.
    pub fn with_backend(
        config: &TiergateConfig,
        backend: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let catalog = StaticLimitCatalog::with_overrides(&config.tiers);
        let store = Arc::new(UsageStore::new(
            backend,
            Arc::new(catalog),
            clock,
            config.enforcement.failure_policy,
        ));

        tracing::info!(
            backend = store.backend().backend_name(),
            policy = config.enforcement.failure_policy.as_str(),
            overridden_tiers = config.tiers.len(),
            "Metering initialized"
        );

        Self {
            engine: QuotaEngine::new(store.clone()),
            reporter: Arc::new(UsageReporter::new(
                store.clone(),
                config.enforcement.warning_threshold_percent,
            )),
            store,
        }
    }

    pub fn engine(&self) -> &QuotaEngine {
        &self.engine
    }

    pub fn reporter(&self) -> &UsageReporter {
        &self.reporter
    }

    pub fn store(&self) -> &UsageStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        models::{ActionKind, Remaining, Tier},
        period::ManualClock,
        store::MemoryCounterStore,
    };

    #[tokio::test]
    async fn test_from_default_config_uses_memory() {
        let metering = Metering::from_config(&TiergateConfig::default())
            .await
            .unwrap();
        assert_eq!(metering.store().backend().backend_name(), "memory");

        let decision = metering
            .engine()
            .check_and_consume("user-1", ActionKind::ChatQuery, Tier::Free)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, Remaining::Finite(19));
    }

    #[tokio::test]
    async fn test_config_overrides_reach_engine_and_reporter() {
        let config = TiergateConfig::from_str(
            r#"
            [enforcement]
            warning_threshold_percent = 50

            [tiers.free]
            chat_query = { limit = 2, period = "daily" }
            "#,
        )
        .unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap(),
        ));
        let metering =
            Metering::with_backend(&config, Arc::new(MemoryCounterStore::new()), clock);

        let first = metering
            .engine()
            .check_and_consume("user-1", ActionKind::ChatQuery, Tier::Free)
            .await;
        assert!(first.allowed);

        let view = metering.reporter().stats("user-1", Tier::Free).await;
        assert_eq!(view.per_action.len(), 1);
        assert!(view.warnings[&ActionKind::ChatQuery]);

        // The override replaced the whole free table.
        let lookup = metering
            .engine()
            .check_and_consume("user-1", ActionKind::DocumentLookup, Tier::Free)
            .await;
        assert!(!lookup.allowed);
    }
}
