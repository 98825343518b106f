//! Timestamp source.
//!
//! Timestamps are UTC with millisecond precision in a fixed-width RFC 3339
//! layout, so string order equals time order.

use std::sync::Mutex;

use time::macros::format_description;
use time::{Duration, OffsetDateTime};

pub trait Clock: Send + Sync {
    fn now(&self) -> String;
}

pub fn format_timestamp(t: OffsetDateTime) -> String {
    let format =
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    t.to_offset(time::UtcOffset::UTC)
        .format(&format)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> String {
        format_timestamp(OffsetDateTime::now_utc())
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> String {
        format_timestamp(*self.now.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn fixed_width_format() {
        let clock = ManualClock::new(datetime!(2025-03-01 09:30:00 UTC));
        assert_eq!(clock.now(), "2025-03-01T09:30:00.000Z");
        clock.advance(Duration::milliseconds(1500));
        assert_eq!(clock.now(), "2025-03-01T09:30:01.500Z");
    }

    #[test]
    fn string_order_matches_time_order() {
        let clock = ManualClock::new(datetime!(2025-03-01 09:30:00.9 UTC));
        let a = clock.now();
        clock.advance(Duration::milliseconds(100));
        let b = clock.now();
        assert!(a < b, "{a} < {b}");
    }
}
