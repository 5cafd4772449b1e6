use crate::period::Period;

/// Canonical counter keys.
pub struct CounterKeys;

impl CounterKeys {
    /// Counter window: usage:{user_id}:{period_kind}:{start}:{end}
    ///
    /// Uses Redis hash tags `{user_id}` so every window of one user hashes to
    /// the same cluster slot. Boundaries are epoch seconds, never formatted dates.
    pub fn window(user_id: &str, period: &Period) -> String {
        format!(
            "usage:{{{}}}:{}:{}:{}",
            user_id,
            period.kind,
            period.start_epoch(),
            period.end_epoch()
        )
    }
}
