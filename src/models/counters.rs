use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ActionKind, PeriodKind, Tier};
use crate::period::Period;

/// Per-action consumption within one window. Absent kinds count as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counters(BTreeMap<ActionKind, u64>);

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, action: ActionKind) -> u64 {
        self.0.get(&action).copied().unwrap_or(0)
    }

    pub fn set(&mut self, action: ActionKind, count: u64) {
        self.0.insert(action, count);
    }

    /// Saturating add; counters never wrap.
    pub fn add(&mut self, action: ActionKind, delta: u64) {
        let entry = self.0.entry(action).or_insert(0);
        *entry = entry.saturating_add(delta);
    }

    pub fn merge(&mut self, other: &Counters) {
        for (action, count) in &other.0 {
            self.add(*action, *count);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|c| *c == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ActionKind, u64)> + '_ {
        self.0.iter().map(|(a, c)| (*a, *c))
    }
}

impl FromIterator<(ActionKind, u64)> for Counters {
    fn from_iter<I: IntoIterator<Item = (ActionKind, u64)>>(iter: I) -> Self {
        let mut counters = Counters::new();
        for (action, count) in iter {
            counters.add(action, count);
        }
        counters
    }
}

/// One physical counter row for a (user, period kind, window).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub user_id: String,
    /// Tier label at creation time. Informational only; enforcement always
    /// uses the tier supplied with the request.
    pub tier: Option<Tier>,
    pub period_kind: PeriodKind,
    pub period: Period,
    pub counts: Counters,
}

/// Result of folding every physical record stored for one window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldedCounters {
    pub counts: Counters,
    /// Number of physical records that were summed.
    pub records: usize,
}

impl FoldedCounters {
    /// More than one record for a single canonical window.
    pub fn is_inconsistent(&self) -> bool {
        self.records > 1
    }
}

impl CounterRecord {
    /// Sum all records for the same window into one logical count.
    ///
    /// Duplicate rows can exist when a backend lacks a uniqueness guarantee;
    /// they are summed here, never discarded.
    pub fn fold(records: &[CounterRecord]) -> FoldedCounters {
        let mut counts = Counters::new();
        for record in records {
            counts.merge(&record.counts);
        }
        FoldedCounters {
            counts,
            records: records.len(),
        }
    }
}
