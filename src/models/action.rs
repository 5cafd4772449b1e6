use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// A category of metered user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Interactive chat query.
    ChatQuery,
    /// Heavier portfolio analysis job.
    PortfolioAnalysis,
    /// Lookup of an external document (filings, reports).
    DocumentLookup,
    /// Edit to portfolio composition.
    PortfolioChange,
}

impl ActionKind {
    pub const ALL: [ActionKind; 4] = [
        ActionKind::ChatQuery,
        ActionKind::PortfolioAnalysis,
        ActionKind::DocumentLookup,
        ActionKind::PortfolioChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ChatQuery => "chat_query",
            ActionKind::PortfolioAnalysis => "portfolio_analysis",
            ActionKind::DocumentLookup => "document_lookup",
            ActionKind::PortfolioChange => "portfolio_change",
        }
    }

    /// Stable slot index, used by backends that keep one counter per kind.
    pub(crate) fn index(&self) -> usize {
        match self {
            ActionKind::ChatQuery => 0,
            ActionKind::PortfolioAnalysis => 1,
            ActionKind::DocumentLookup => 2,
            ActionKind::PortfolioChange => 3,
        }
    }

    /// Counter column in the `usage_counters` table.
    ///
    /// Interpolated into SQL, so it must only ever come from this match.
    pub fn column(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a caller names an action kind this crate does not meter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action kind '{0}'")]
pub struct UnknownActionName(pub String);

impl FromStr for ActionKind {
    type Err = UnknownActionName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat_query" => Ok(ActionKind::ChatQuery),
            "portfolio_analysis" => Ok(ActionKind::PortfolioAnalysis),
            "document_lookup" => Ok(ActionKind::DocumentLookup),
            "portfolio_change" => Ok(ActionKind::PortfolioChange),
            _ => Err(UnknownActionName(s.to_string())),
        }
    }
}

/// Subscription tier held by a user.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Premium,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Free, Tier::Pro, Tier::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Premium => "premium",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown tier '{0}'. Valid tiers: free, pro, premium")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            "premium" => Ok(Tier::Premium),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// Length of an accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Daily,
    Monthly,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Daily => "daily",
            PeriodKind::Monthly => "monthly",
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(PeriodKind::Daily),
            "monthly" => Ok(PeriodKind::Monthly),
            _ => Err(format!(
                "Invalid period '{}'. Valid periods: daily, monthly",
                s
            )),
        }
    }
}
