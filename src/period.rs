//! Canonical accounting windows.
//!
//! Every counter is identified by the `[start, end)` window it belongs to, so
//! the boundaries produced here are part of the storage key. They are always
//! computed in UTC and exposed to backends as integer epoch seconds; formatted
//! timestamps are never compared.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Datelike, Days, Months, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PeriodKind;

/// Half-open `[start, end)` accounting window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub kind: PeriodKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Period {
    /// Window boundary as integer epoch seconds, the only form used as a key.
    pub fn start_epoch(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_epoch(&self) -> i64 {
        self.end.timestamp()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Rebuild a window from stored epoch boundaries.
    pub fn from_epochs(kind: PeriodKind, start: i64, end: i64) -> Option<Self> {
        Some(Self {
            kind,
            start: Utc.timestamp_opt(start, 0).single()?,
            end: Utc.timestamp_opt(end, 0).single()?,
        })
    }

    /// Time left until the window closes, zero once it has.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.end - now).max(chrono::Duration::zero())
    }
}

/// Compute the canonical window of `kind` containing `now`.
pub fn current_period(kind: PeriodKind, now: DateTime<Utc>) -> Period {
    let day = now.date_naive();
    match kind {
        PeriodKind::Daily => {
            let start = day.and_time(NaiveTime::MIN).and_utc();
            Period {
                kind,
                start,
                end: start + Days::new(1),
            }
        }
        PeriodKind::Monthly => {
            let first = day - Days::new(u64::from(day.day0()));
            let start = first.and_time(NaiveTime::MIN).and_utc();
            Period {
                kind,
                start,
                end: start + Months::new(1),
            }
        }
    }
}

/// Source of "now" for period computation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Millisecond resolution.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}
