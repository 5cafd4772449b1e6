//! Usage metering and tier-based quota enforcement.
//!
//! Each metered action is counted per user in calendar-aligned UTC windows
//! and admitted only while the caller's tier allows it. Admission is a
//! single atomic conditional increment in the counter store, so concurrent
//! requests never overshoot a limit.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use tiergate::{ActionKind, Metering, Tier, TiergateConfig};
//!
//! let metering = Metering::from_config(&TiergateConfig::default()).await?;
//! let decision = metering
//!     .engine()
//!     .check_and_consume("user-42", ActionKind::ChatQuery, Tier::Free)
//!     .await;
//! if !decision.allowed {
//!     println!("denied: {:?}", decision.reason);
//! }
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod metering;
pub mod models;
pub mod observability;
pub mod period;
pub mod reporting;
pub mod store;

pub use catalog::{LimitCatalog, StaticLimitCatalog, TierLimits};
pub use config::{ConfigError, FailurePolicy, TiergateConfig};
pub use engine::QuotaEngine;
pub use metering::Metering;
pub use models::{
    ActionKind, ActionLimit, Counters, Decision, DenialReason, Limit, PeriodKind, Remaining, Tier,
};
pub use period::{Clock, Period, SystemClock, current_period};
pub use reporting::{ActionUsage, UsageReporter, UsageStatsView};
pub use store::{CounterStore, StoreError, UsageStore};
