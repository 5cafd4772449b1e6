use std::fmt;

use serde::{Deserialize, Serialize};

use super::PeriodKind;

/// Cap on the number of actions per window.
///
/// In config and JSON this is either a non-negative integer or the string
/// `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "LimitRepr", into = "LimitRepr")]
pub enum Limit {
    Bounded(u64),
    Unbounded,
}

impl Limit {
    pub fn as_bounded(&self) -> Option<u64> {
        match self {
            Limit::Bounded(n) => Some(*n),
            Limit::Unbounded => None,
        }
    }

    /// Remaining allowance given a current count.
    pub fn remaining_after(&self, used: u64) -> Remaining {
        match self {
            Limit::Bounded(n) => Remaining::Finite(n.saturating_sub(used)),
            Limit::Unbounded => Remaining::Unbounded,
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Bounded(n) => write!(f, "{}", n),
            Limit::Unbounded => f.write_str("unbounded"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LimitRepr {
    Count(u64),
    Word(String),
}

impl TryFrom<LimitRepr> for Limit {
    type Error = String;

    fn try_from(value: LimitRepr) -> Result<Self, Self::Error> {
        match value {
            LimitRepr::Count(n) => Ok(Limit::Bounded(n)),
            LimitRepr::Word(w) if w.eq_ignore_ascii_case("unbounded") => Ok(Limit::Unbounded),
            LimitRepr::Word(w) => Err(format!(
                "invalid limit '{}': expected a non-negative integer or \"unbounded\"",
                w
            )),
        }
    }
}

impl From<Limit> for LimitRepr {
    fn from(value: Limit) -> Self {
        match value {
            Limit::Bounded(n) => LimitRepr::Count(n),
            Limit::Unbounded => LimitRepr::Word("unbounded".to_string()),
        }
    }
}

/// Limit and window length configured for one action kind in one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionLimit {
    pub limit: Limit,
    pub period: PeriodKind,
}

impl ActionLimit {
    pub const fn daily(limit: u64) -> Self {
        Self {
            limit: Limit::Bounded(limit),
            period: PeriodKind::Daily,
        }
    }

    pub const fn monthly(limit: u64) -> Self {
        Self {
            limit: Limit::Bounded(limit),
            period: PeriodKind::Monthly,
        }
    }

    pub const fn unbounded(period: PeriodKind) -> Self {
        Self {
            limit: Limit::Unbounded,
            period,
        }
    }
}

/// Allowance left in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Remaining {
    Finite(u64),
    Unbounded,
    /// The store could not confirm the count.
    Unknown,
}
