/// Server timestamp primitive
///
/// Every write to the store is stamped by one `ServerClock`, so ordering
/// never depends on a client's wall clock.
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Microseconds since the Unix epoch, as assigned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn as_millis(&self) -> i64 {
        self.0.div_euclid(1_000)
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_micros(self.0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

/// Strictly increasing clock shared by all writers of one store
#[derive(Debug, Default)]
pub struct ServerClock {
    last: AtomicI64,
}

impl ServerClock {
    /// Start a clock that never goes below `floor` (e.g. the last persisted stamp)
    pub fn starting_after(floor: Timestamp) -> Self {
        Self {
            last: AtomicI64::new(floor.as_micros()),
        }
    }

    /// Next timestamp: wall clock, bumped past the previous stamp if needed
    pub fn now(&self) -> Timestamp {
        let wall = Utc::now().timestamp_micros();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Timestamp(next),
                Err(actual) => prev = actual,
            }
        }
    }

    pub fn last(&self) -> Timestamp {
        Timestamp(self.last.load(Ordering::Acquire))
    }
}
