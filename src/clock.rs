//! Wall clock in the device's local time zone.

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Local time is UTC plus an offset the server hands out with each poll.
#[derive(Debug)]
pub struct LocalClock {
    offset_minutes: AtomicI32,
    boot: Instant,
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalClock {
    pub fn new() -> Self {
        Self {
            offset_minutes: AtomicI32::new(0),
            boot: Instant::now(),
        }
    }

    pub fn set_offset_minutes(&self, minutes: i32) {
        let previous = self.offset_minutes.swap(minutes, Ordering::Relaxed);
        if previous != minutes {
            tracing::info!(offset_minutes = minutes, "timezone updated");
        }
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset_minutes.load(Ordering::Relaxed)
    }

    /// Time since the daemon started.
    pub fn uptime(&self) -> std::time::Duration {
        self.boot.elapsed()
    }

    /// Seconds since local midnight at `now`.
    pub fn seconds_of_day_at(&self, now: SystemTime) -> u32 {
        seconds_of_day(now, self.offset_minutes())
    }

    pub fn seconds_of_day(&self) -> u32 {
        self.seconds_of_day_at(SystemTime::now())
    }
}

/// Seconds since local midnight for a UTC instant and offset.
pub fn seconds_of_day(now: SystemTime, offset_minutes: i32) -> u32 {
    let utc = match now.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    };
    let local = utc + i64::from(offset_minutes) * 60;
    local.rem_euclid(SECONDS_PER_DAY) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_utc_seconds_of_day() {
        // 2023-11-14T22:13:20Z
        assert_eq!(seconds_of_day(at(1_700_000_000), 0), 80_000);
    }

    #[test]
    fn test_positive_offset_wraps_to_next_day() {
        assert_eq!(seconds_of_day(at(1_700_000_000), 120), 80_000 + 7_200 - 86_400);
    }

    #[test]
    fn test_negative_offset_wraps_to_previous_day() {
        assert_eq!(seconds_of_day(at(3_600), -120), 86_400 - 3_600);
    }

    #[test]
    fn test_clock_applies_offset() {
        let clock = LocalClock::new();
        clock.set_offset_minutes(-300);
        assert_eq!(clock.offset_minutes(), -300);
        assert_eq!(clock.seconds_of_day_at(at(18_000)), 0);
    }
}
