use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActionKind, Limit, PeriodKind, Remaining};
use crate::period::Period;

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum DenialReason {
    /// The window's allowance for this action is used up.
    LimitExceeded {
        action: ActionKind,
        limit: u64,
        period_kind: PeriodKind,
        resets_at: DateTime<Utc>,
    },
    /// No limit is configured for this action in the caller's tier.
    UnknownAction { action: String },
    /// The counter store could not confirm the increment and the failure
    /// policy is fail-closed.
    StoreUnavailable,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::LimitExceeded { .. } => "limit_exceeded",
            DenialReason::UnknownAction { .. } => "unknown_action",
            DenialReason::StoreUnavailable => "store_unavailable",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::LimitExceeded {
                action,
                limit,
                period_kind,
                resets_at,
            } => write!(
                f,
                "{} limit of {} per {} period reached; resets at {}",
                action,
                limit,
                period_kind,
                resets_at.to_rfc3339()
            ),
            DenialReason::UnknownAction { action } => {
                write!(f, "unknown_action: '{}' is not metered for this tier", action)
            }
            DenialReason::StoreUnavailable => {
                write!(f, "usage store unavailable; request not admitted")
            }
        }
    }
}

/// Outcome of one `check_and_consume` call. Terminal: there is no pending state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    /// Raw action name as requested, so unknown names are preserved.
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    pub remaining: Remaining,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Limit>,
    /// Window the action was counted against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    /// Metering was degraded: the increment could not be confirmed.
    #[serde(default)]
    pub degraded: bool,
}

impl Decision {
    pub fn unknown_action(action: impl Into<String>) -> Self {
        let action = action.into();
        Self {
            allowed: false,
            reason: Some(DenialReason::UnknownAction {
                action: action.clone(),
            }),
            action,
            remaining: Remaining::Finite(0),
            limit: None,
            period: None,
            degraded: false,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// How long the caller should wait before retrying a limit denial.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match &self.reason {
            Some(DenialReason::LimitExceeded { .. }) => {
                self.period.map(|period| period.remaining_at(now))
            }
            _ => None,
        }
    }
}
