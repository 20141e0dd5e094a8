/**
 * CLOCK - Time source for the kernel
 *
 * Everything that needs "now" takes it from a Clock so tests can drive sweeps
 * and heartbeats with a ManualClock instead of sleeping.
 */

use parking_lot::Mutex;
use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock (UTC).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, at: OffsetDateTime) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: std::time::Duration) -> OffsetDateTime {
        let mut now = self.now.lock();
        *now += by;
        *now
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use time::macros::datetime;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new(datetime!(2026-01-01 0:00 UTC));
        assert_eq!(clock.now(), datetime!(2026-01-01 0:00 UTC));

        let later = clock.advance(Duration::from_secs(90));
        assert_eq!(later, datetime!(2026-01-01 0:01:30 UTC));
        assert_eq!(clock.now(), later);

        clock.set(datetime!(2026-02-01 12:00 UTC));
        assert_eq!(clock.now(), datetime!(2026-02-01 12:00 UTC));
    }
}
