use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{CounterKey, CounterStore, FailurePolicy, UnknownAction};
use crate::{
    catalog::LimitCatalog,
    models::{ActionKind, ActionLimit, CounterRecord, Counters, Limit, PeriodKind, Remaining, Tier},
    observability::metrics,
    period::{Clock, Period, current_period},
};

/// Result of one metered increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: Remaining,
    pub limit: Limit,
    /// Window the attempt was counted against.
    pub period: Period,
    /// Count after the attempt. `None` when the store could not confirm it.
    pub count: Option<u64>,
    /// The store failed and the failure policy decided the outcome.
    pub degraded: bool,
}

/// Usage counters behind the limit catalog, the clock and the failure policy.
///
/// Never raises backend errors to callers: reads degrade to zero counts and
/// increments are resolved by the configured [`FailurePolicy`].
pub struct UsageStore {
    backend: Arc<dyn CounterStore>,
    catalog: Arc<dyn LimitCatalog>,
    clock: Arc<dyn Clock>,
    policy: FailurePolicy,
}

impl UsageStore {
    pub fn new(
        backend: Arc<dyn CounterStore>,
        catalog: Arc<dyn LimitCatalog>,
        clock: Arc<dyn Clock>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            backend,
            catalog,
            clock,
            policy,
        }
    }

    pub fn catalog(&self) -> &dyn LimitCatalog {
        self.catalog.as_ref()
    }

    pub fn backend(&self) -> &dyn CounterStore {
        self.backend.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Counts for the user's current window of `kind`.
    pub async fn read(&self, user_id: &str, kind: PeriodKind) -> Counters {
        self.read_at(user_id, kind, self.clock.now()).await
    }

    /// Counts for the window of `kind` containing `at`.
    ///
    /// Duplicate records are summed and reported. Backend failures read as
    /// zero counts.
    pub async fn read_at(&self, user_id: &str, kind: PeriodKind, at: DateTime<Utc>) -> Counters {
        let key = CounterKey::new(user_id, current_period(kind, at));

        let records = match self.backend.read(&key).await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    backend = self.backend.backend_name(),
                    user_id,
                    period = %kind,
                    "Counter read failed; reporting zero usage"
                );
                metrics::record_store_failure(self.backend.backend_name(), "read");
                return Counters::new();
            }
        };

        let folded = CounterRecord::fold(&records);
        if folded.is_inconsistent() {
            tracing::warn!(
                backend = self.backend.backend_name(),
                user_id,
                period = %kind,
                period_start = key.period.start_epoch(),
                records = folded.records,
                "InconsistentCounterState: multiple counter records for one window; summing"
            );
            metrics::record_counter_duplicates(
                self.backend.backend_name(),
                kind.as_str(),
                folded.records,
            );
        }
        folded.counts
    }

    /// Conditionally count one `action` against the tier's configured limit.
    pub async fn increment_if_allowed(
        &self,
        user_id: &str,
        action: ActionKind,
        tier: Tier,
    ) -> Result<Admission, UnknownAction> {
        let limit = self
            .catalog
            .limit_for(tier, action)
            .ok_or(UnknownAction { action, tier })?;
        Ok(self.increment_with_limit(user_id, action, tier, limit).await)
    }

    /// Conditionally count one `action` against an explicit limit.
    pub async fn increment_with_limit(
        &self,
        user_id: &str,
        action: ActionKind,
        tier: Tier,
        limit: ActionLimit,
    ) -> Admission {
        let period = current_period(limit.period, self.clock.now());
        let key = CounterKey::new(user_id, period);

        match self
            .backend
            .increment_if_allowed(&key, action, tier, limit.limit)
            .await
        {
            Ok(outcome) => Admission {
                allowed: outcome.allowed,
                remaining: if outcome.allowed {
                    limit.limit.remaining_after(outcome.count)
                } else {
                    Remaining::Finite(0)
                },
                limit: limit.limit,
                period,
                count: Some(outcome.count),
                degraded: false,
            },
            Err(e) => {
                tracing::error!(
                    error = %e,
                    backend = self.backend.backend_name(),
                    user_id,
                    action = %action,
                    policy = self.policy.as_str(),
                    "StoreUnavailable: counter increment failed"
                );
                metrics::record_store_failure(self.backend.backend_name(), "increment");
                // There is no cap to violate without a bound, so the policy
                // only decides bounded limits.
                let allowed = match limit.limit {
                    Limit::Unbounded => true,
                    Limit::Bounded(_) => self.policy == FailurePolicy::FailOpen,
                };
                Admission {
                    allowed,
                    remaining: Remaining::Unknown,
                    limit: limit.limit,
                    period,
                    count: None,
                    degraded: true,
                }
            }
        }
    }
}
