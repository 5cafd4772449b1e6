//! Admission decisions for metered actions.
//!
//! [`QuotaEngine::check_and_consume`] is the only write path for usage: it
//! looks up the caller's limit, performs the store's atomic conditional
//! increment and turns the outcome into a [`Decision`]. Counts are never
//! cached between calls.

use std::sync::Arc;

use crate::{
    models::{ActionKind, Decision, DenialReason, Remaining, Tier},
    observability::metrics,
    store::{Admission, UnknownAction, UsageStore},
};

#[derive(Clone)]
pub struct QuotaEngine {
    store: Arc<UsageStore>,
}

impl QuotaEngine {
    pub fn new(store: Arc<UsageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &UsageStore {
        &self.store
    }

    /// Count one `action` for `user_id` if the tier's limit allows it.
    pub async fn check_and_consume(&self, user_id: &str, action: ActionKind, tier: Tier) -> Decision {
        match self.store.increment_if_allowed(user_id, action, tier).await {
            Ok(admission) => self.decide(user_id, action, tier, admission),
            Err(UnknownAction { action, tier }) => {
                self.deny_unknown(user_id, action.as_str(), tier)
            }
        }
    }

    /// Like [`check_and_consume`](Self::check_and_consume) for a raw action
    /// name. Names outside the known action kinds are denied as unknown.
    pub async fn check_and_consume_named(
        &self,
        user_id: &str,
        action: &str,
        tier: Tier,
    ) -> Decision {
        match action.parse::<ActionKind>() {
            Ok(kind) => self.check_and_consume(user_id, kind, tier).await,
            Err(_) => self.deny_unknown(user_id, action, tier),
        }
    }

    fn deny_unknown(&self, user_id: &str, action: &str, tier: Tier) -> Decision {
        tracing::info!(user_id, action, tier = %tier, "Denied unknown action");
        metrics::record_quota_decision("unknown_action", action, tier.as_str());
        Decision::unknown_action(action)
    }

    fn decide(&self, user_id: &str, action: ActionKind, tier: Tier, admission: Admission) -> Decision {
        let reason = match (admission.allowed, admission.degraded) {
            (true, _) => None,
            (false, true) => Some(DenialReason::StoreUnavailable),
            (false, false) => Some(DenialReason::LimitExceeded {
                action,
                limit: admission.limit.as_bounded().unwrap_or(0),
                period_kind: admission.period.kind,
                resets_at: admission.period.end,
            }),
        };

        let outcome = if admission.degraded {
            "degraded"
        } else if admission.allowed {
            "allowed"
        } else {
            "denied"
        };
        metrics::record_quota_decision(outcome, action.as_str(), tier.as_str());

        match &reason {
            None => tracing::debug!(
                user_id,
                action = %action,
                tier = %tier,
                count = ?admission.count,
                degraded = admission.degraded,
                "Action admitted"
            ),
            Some(reason) => tracing::info!(
                user_id,
                action = %action,
                tier = %tier,
                code = reason.code(),
                "Action denied: {}",
                reason
            ),
        }

        Decision {
            allowed: admission.allowed,
            action: action.as_str().to_string(),
            reason,
            remaining: if admission.allowed {
                admission.remaining
            } else if admission.degraded {
                Remaining::Unknown
            } else {
                Remaining::Finite(0)
            },
            limit: Some(admission.limit),
            period: Some(admission.period),
            degraded: admission.degraded,
        }
    }
}
