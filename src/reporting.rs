//! Read-only usage summaries for account and dashboard views.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    models::{ActionKind, Limit, PeriodKind, Remaining, Tier},
    observability::metrics,
    period::current_period,
    store::UsageStore,
};

/// Usage of one action in its current window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionUsage {
    pub used: u64,
    pub limit: Limit,
    pub remaining: Remaining,
    /// Share of a bounded limit used, in percent. `None` when unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    pub period: PeriodKind,
    pub resets_at: DateTime<Utc>,
}

/// Per-action usage and near-limit warnings for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageStatsView {
    pub tier: Tier,
    pub per_action: BTreeMap<ActionKind, ActionUsage>,
    pub warnings: BTreeMap<ActionKind, bool>,
}

impl UsageStatsView {
    /// Actions at or above the warning threshold.
    pub fn warned_actions(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.warnings
            .iter()
            .filter(|(_, warned)| **warned)
            .map(|(action, _)| *action)
    }
}

pub struct UsageReporter {
    store: Arc<UsageStore>,
    warning_threshold_percent: u8,
}

impl UsageReporter {
    pub fn new(store: Arc<UsageStore>, warning_threshold_percent: u8) -> Self {
        Self {
            store,
            warning_threshold_percent,
        }
    }

    /// Summarize the user's usage against every limit of `tier`.
    ///
    /// Each window length is read once. Never writes.
    pub async fn stats(&self, user_id: &str, tier: Tier) -> UsageStatsView {
        let now = self.store.now();
        let mut view = UsageStatsView {
            tier,
            per_action: BTreeMap::new(),
            warnings: BTreeMap::new(),
        };

        let Some(limits) = self.store.catalog().limits(tier) else {
            return view;
        };

        let mut counters = BTreeMap::new();
        for kind in limits.period_kinds() {
            counters.insert(kind, self.store.read_at(user_id, kind, now).await);
        }

        for (action, limit) in limits.iter() {
            let used = counters
                .get(&limit.period)
                .map(|c| c.get(action))
                .unwrap_or(0);
            let percent = usage_percent(used, limit.limit);
            let warned = percent.is_some_and(|p| p >= f64::from(self.warning_threshold_percent));

            if warned {
                tracing::debug!(
                    user_id,
                    action = %action,
                    used,
                    limit = %limit.limit,
                    "Usage at or above warning threshold"
                );
                metrics::record_usage_warning(action.as_str(), tier.as_str());
            }

            view.per_action.insert(
                action,
                ActionUsage {
                    used,
                    limit: limit.limit,
                    remaining: limit.limit.remaining_after(used),
                    percent,
                    period: limit.period,
                    resets_at: current_period(limit.period, now).end,
                },
            );
            view.warnings.insert(action, warned);
        }

        view
    }
}

/// Percent of a bounded limit consumed. A zero limit is always fully used.
fn usage_percent(used: u64, limit: Limit) -> Option<f64> {
    match limit {
        Limit::Unbounded => None,
        Limit::Bounded(0) => Some(100.0),
        Limit::Bounded(n) => Some(used as f64 * 100.0 / n as f64),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;
    use crate::{
        catalog::{StaticLimitCatalog, TierLimits},
        config::FailurePolicy,
        engine::QuotaEngine,
        models::ActionLimit,
        period::ManualClock,
        store::{MemoryCounterStore, tests::UnavailableStore},
    };

    fn setup(catalog: StaticLimitCatalog) -> (QuotaEngine, UsageReporter) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(UsageStore::new(
            Arc::new(MemoryCounterStore::new()),
            Arc::new(catalog),
            clock,
            FailurePolicy::FailOpen,
        ));
        (
            QuotaEngine::new(store.clone()),
            UsageReporter::new(store, 80),
        )
    }

    #[rstest]
    #[case(0, Limit::Bounded(20), Some(0.0))]
    #[case(16, Limit::Bounded(20), Some(80.0))]
    #[case(20, Limit::Bounded(20), Some(100.0))]
    #[case(0, Limit::Bounded(0), Some(100.0))]
    #[case(5_000, Limit::Unbounded, None)]
    fn test_usage_percent(#[case] used: u64, #[case] limit: Limit, #[case] expected: Option<f64>) {
        assert_eq!(usage_percent(used, limit), expected);
    }

    #[tokio::test]
    async fn test_new_user_has_zero_usage() {
        let (_, reporter) = setup(StaticLimitCatalog::with_defaults());
        let view = reporter.stats("fresh", Tier::Free).await;

        assert_eq!(view.per_action.len(), ActionKind::ALL.len());
        for usage in view.per_action.values() {
            assert_eq!(usage.used, 0);
        }
        assert_eq!(view.warned_actions().count(), 0);
        let chat = &view.per_action[&ActionKind::ChatQuery];
        assert_eq!(chat.remaining, Remaining::Finite(20));
        assert_eq!(
            chat.resets_at,
            Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_warning_at_eighty_percent() {
        let (engine, reporter) = setup(StaticLimitCatalog::with_defaults());
        for _ in 0..15 {
            engine
                .check_and_consume("u-1", ActionKind::ChatQuery, Tier::Free)
                .await;
        }
        let view = reporter.stats("u-1", Tier::Free).await;
        assert!(!view.warnings[&ActionKind::ChatQuery]);

        engine
            .check_and_consume("u-1", ActionKind::ChatQuery, Tier::Free)
            .await;
        let view = reporter.stats("u-1", Tier::Free).await;
        let chat = &view.per_action[&ActionKind::ChatQuery];
        assert_eq!(chat.used, 16);
        assert_eq!(chat.percent, Some(80.0));
        assert!(view.warnings[&ActionKind::ChatQuery]);
        assert_eq!(
            view.warned_actions().collect::<Vec<_>>(),
            vec![ActionKind::ChatQuery]
        );
    }

    #[tokio::test]
    async fn test_unbounded_never_warns() {
        let (engine, reporter) = setup(StaticLimitCatalog::with_defaults());
        for _ in 0..500 {
            engine
                .check_and_consume("u-premium", ActionKind::ChatQuery, Tier::Premium)
                .await;
        }
        let view = reporter.stats("u-premium", Tier::Premium).await;
        let chat = &view.per_action[&ActionKind::ChatQuery];
        assert_eq!(chat.used, 500);
        assert_eq!(chat.percent, None);
        assert_eq!(chat.remaining, Remaining::Unbounded);
        assert!(!view.warnings[&ActionKind::ChatQuery]);
    }

    #[tokio::test]
    async fn test_zero_limit_reads_as_exhausted() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            Tier::Free,
            [(ActionKind::PortfolioChange, ActionLimit::monthly(0))]
                .into_iter()
                .collect::<TierLimits>(),
        );
        let (_, reporter) = setup(StaticLimitCatalog::with_overrides(&overrides));

        let view = reporter.stats("u-1", Tier::Free).await;
        let change = &view.per_action[&ActionKind::PortfolioChange];
        assert_eq!(change.percent, Some(100.0));
        assert_eq!(change.remaining, Remaining::Finite(0));
        assert!(view.warnings[&ActionKind::PortfolioChange]);
        assert_eq!(view.per_action.len(), 1);
    }

    #[tokio::test]
    async fn test_stats_are_idempotent() {
        let (engine, reporter) = setup(StaticLimitCatalog::with_defaults());
        engine
            .check_and_consume("u-1", ActionKind::DocumentLookup, Tier::Free)
            .await;

        let first = reporter.stats("u-1", Tier::Free).await;
        let second = reporter.stats("u-1", Tier::Free).await;
        assert_eq!(first, second);
        assert_eq!(first.per_action[&ActionKind::DocumentLookup].used, 1);
    }

    #[tokio::test]
    async fn test_store_failure_reads_as_zero() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(UsageStore::new(
            Arc::new(UnavailableStore),
            Arc::new(StaticLimitCatalog::with_defaults()),
            clock,
            FailurePolicy::FailOpen,
        ));
        let view = UsageReporter::new(store, 80).stats("u-1", Tier::Pro).await;
        assert!(view.per_action.values().all(|u| u.used == 0));
    }
}
