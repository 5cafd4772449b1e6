//! Tier limit catalog.
//!
//! Maps a subscription tier to the limit and window length of every action
//! kind it meters. The catalog is embedded configuration: lookups are
//! synchronous, side-effect free and always available.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tiergate::catalog::{LimitCatalog, StaticLimitCatalog};
//!
//! let catalog = StaticLimitCatalog::with_defaults();
//! let chat = catalog.limit_for(Tier::Free, ActionKind::ChatQuery);
//! assert_eq!(chat, Some(ActionLimit::daily(20)));
//! ```

mod registry;

pub use registry::{StaticLimitCatalog, TierLimits, default_tier_limits};

use crate::models::{ActionKind, ActionLimit, Tier};

/// Read-only lookup of per-tier limits.
pub trait LimitCatalog: Send + Sync {
    /// All limits configured for a tier, or `None` if the tier has none.
    fn limits(&self, tier: Tier) -> Option<&TierLimits>;

    /// Limit for one action in one tier. `None` means the action is not
    /// metered for that tier and must be denied as unknown.
    fn limit_for(&self, tier: Tier, action: ActionKind) -> Option<ActionLimit> {
        self.limits(tier).and_then(|limits| limits.get(action))
    }
}
