use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::LimitCatalog;
use crate::models::{ActionKind, ActionLimit, PeriodKind, Tier};

/// Limits for every metered action in one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierLimits(BTreeMap<ActionKind, ActionLimit>);

impl TierLimits {
    pub fn get(&self, action: ActionKind) -> Option<ActionLimit> {
        self.0.get(&action).copied()
    }

    pub fn insert(&mut self, action: ActionKind, limit: ActionLimit) {
        self.0.insert(action, limit);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionKind, ActionLimit)> + '_ {
        self.0.iter().map(|(a, l)| (*a, *l))
    }

    /// Window lengths this tier needs counters for.
    pub fn period_kinds(&self) -> Vec<PeriodKind> {
        let mut kinds: Vec<PeriodKind> = self.0.values().map(|l| l.period).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ActionKind, ActionLimit)> for TierLimits {
    fn from_iter<I: IntoIterator<Item = (ActionKind, ActionLimit)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Built-in limits used when config does not override a tier.
pub fn default_tier_limits(tier: Tier) -> TierLimits {
    use ActionKind::*;

    match tier {
        Tier::Free => [
            (ChatQuery, ActionLimit::daily(20)),
            (PortfolioAnalysis, ActionLimit::daily(3)),
            (DocumentLookup, ActionLimit::monthly(10)),
            (PortfolioChange, ActionLimit::monthly(5)),
        ]
        .into_iter()
        .collect(),
        Tier::Pro => [
            (ChatQuery, ActionLimit::daily(200)),
            (PortfolioAnalysis, ActionLimit::daily(50)),
            (DocumentLookup, ActionLimit::monthly(200)),
            (PortfolioChange, ActionLimit::monthly(100)),
        ]
        .into_iter()
        .collect(),
        Tier::Premium => [
            (ChatQuery, ActionLimit::unbounded(PeriodKind::Daily)),
            (PortfolioAnalysis, ActionLimit::unbounded(PeriodKind::Daily)),
            (DocumentLookup, ActionLimit::monthly(1000)),
            (PortfolioChange, ActionLimit::unbounded(PeriodKind::Monthly)),
        ]
        .into_iter()
        .collect(),
    }
}

/// Catalog backed by an in-memory table, built once at startup.
#[derive(Debug, Clone)]
pub struct StaticLimitCatalog {
    tiers: HashMap<Tier, TierLimits>,
}

impl StaticLimitCatalog {
    pub fn with_defaults() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }

    /// Defaults for every tier, with each overridden tier replaced wholesale.
    ///
    /// A tier table that omits an action leaves that action unmetered (and
    /// therefore denied) for the tier.
    pub fn with_overrides(overrides: &BTreeMap<Tier, TierLimits>) -> Self {
        let tiers = Tier::ALL
            .iter()
            .map(|tier| {
                let limits = overrides
                    .get(tier)
                    .cloned()
                    .unwrap_or_else(|| default_tier_limits(*tier));
                (*tier, limits)
            })
            .collect();
        Self { tiers }
    }
}

impl Default for StaticLimitCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl LimitCatalog for StaticLimitCatalog {
    fn limits(&self, tier: Tier) -> Option<&TierLimits> {
        self.tiers.get(&tier)
    }
}
