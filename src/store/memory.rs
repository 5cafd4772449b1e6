use std::{
    hint,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Maximum number of CAS retries before giving up under extreme contention.
const MAX_CAS_RETRIES: usize = 100;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CounterKey, CounterStore, IncrementOutcome, StoreError, StoreResult};
use crate::models::{ActionKind, CounterRecord, Counters, Limit, Tier};

/// Counters for one window. The tier is fixed when the cell is created.
struct WindowCell {
    key: CounterKey,
    tier: Tier,
    counts: [AtomicU64; ActionKind::ALL.len()],
}

impl WindowCell {
    fn new(key: CounterKey, tier: Tier) -> Self {
        Self {
            key,
            tier,
            counts: Default::default(),
        }
    }

    fn counter(&self, action: ActionKind) -> &AtomicU64 {
        &self.counts[action.index()]
    }

    fn snapshot(&self) -> CounterRecord {
        let counts: Counters = ActionKind::ALL
            .iter()
            .map(|action| (*action, self.counter(*action).load(Ordering::SeqCst)))
            .collect();
        CounterRecord {
            user_id: self.key.user_id.clone(),
            tier: Some(self.tier),
            period_kind: self.key.period_kind(),
            period: self.key.period,
            counts,
        }
    }
}

/// In-process counter store.
///
/// Counts live only as long as the process and are not shared between
/// instances. Each window can hold at most one record.
#[derive(Clone, Default)]
pub struct MemoryCounterStore {
    windows: Arc<DashMap<String, Arc<WindowCell>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of windows currently held.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn read(&self, key: &CounterKey) -> StoreResult<Vec<CounterRecord>> {
        Ok(self
            .windows
            .get(&key.canonical())
            .map(|cell| vec![cell.snapshot()])
            .unwrap_or_default())
    }

    async fn increment_if_allowed(
        &self,
        key: &CounterKey,
        action: ActionKind,
        tier: Tier,
        limit: Limit,
    ) -> StoreResult<IncrementOutcome> {
        let canonical = key.canonical();

        // A zero limit can never admit, so it must not create a record either.
        if limit == Limit::Bounded(0) && !self.windows.contains_key(&canonical) {
            return Ok(IncrementOutcome {
                allowed: false,
                count: 0,
            });
        }

        let cell = self
            .windows
            .entry(canonical)
            .or_insert_with(|| Arc::new(WindowCell::new(key.clone(), tier)))
            .clone();
        let counter = cell.counter(action);

        for _ in 0..MAX_CAS_RETRIES {
            let current = counter.load(Ordering::SeqCst);
            if let Limit::Bounded(max) = limit
                && current >= max
            {
                return Ok(IncrementOutcome {
                    allowed: false,
                    count: current,
                });
            }

            match counter.compare_exchange(
                current,
                current.saturating_add(1),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Ok(IncrementOutcome {
                        allowed: true,
                        count: current.saturating_add(1),
                    });
                }
                Err(_) => {
                    // Another task moved the counter; yield and retry
                    hint::spin_loop();
                }
            }
        }

        Err(StoreError::Contention(format!(
            "{} on {}: CAS retries exhausted",
            action,
            key.canonical()
        )))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
