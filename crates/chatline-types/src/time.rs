use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

/// Source of wall-clock time in unix seconds.
///
/// Injected wherever time matters (event timestamps, idempotency expiry) so
/// tests can pin it.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> i64;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    secs: AtomicI64,
}

impl ManualClock {
    pub fn new(secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(secs),
        }
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Whether `ts` falls inside the range a calendar date can be derived for.
///
/// Anything inside leaves ample headroom for `ts + 1` and expiry arithmetic.
pub fn is_representable(ts: i64) -> bool {
    DateTime::from_timestamp(ts, 0).is_some()
}

/// The last second [`is_representable`] accepts.
pub fn max_timestamp() -> i64 {
    DateTime::<Utc>::MAX_UTC.timestamp()
}

/// Format unix seconds as `YYYY-MM-DDTHH:MM:SSZ`.
///
/// Timestamps outside chrono's range fall back to the epoch.
pub fn iso8601(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}
