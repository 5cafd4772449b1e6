use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Quota enforcement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcementConfig {
    /// What to do with a request when the counter store cannot be reached.
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// Usage percentage of a bounded limit at which reporting flags a warning.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold_percent: u8,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            warning_threshold_percent: default_warning_threshold(),
        }
    }
}

impl EnforcementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.warning_threshold_percent) {
            return Err(ConfigError::Validation(format!(
                "enforcement.warning_threshold_percent must be between 1 and 100, got {}",
                self.warning_threshold_percent
            )));
        }
        Ok(())
    }
}

fn default_warning_threshold() -> u8 {
    80
}

/// Behavior when an increment cannot be confirmed by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the action unmetered and mark the decision degraded.
    #[default]
    FailOpen,
    /// Deny the action and mark the decision degraded.
    FailClosed,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::FailOpen => "fail_open",
            FailurePolicy::FailClosed => "fail_closed",
        }
    }
}
