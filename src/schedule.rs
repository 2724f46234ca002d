//! Clock alignment for the two collection loops.
//!
//! Boundaries are computed from the loop's nominal tick, not from the time
//! the thread actually woke up, so a slow iteration or a suspended host
//! never shifts the grid. The actual wake time is compared against the
//! nominal one and a large lag is logged, then the nominal tick is
//! recomputed from the wall clock so the loop does not replay missed slots.

use chrono::{TimeZone, Timelike};
use chrono_tz::Tz;
use log::warn;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

pub const MINUTE_MS: i64 = 60_000;
pub const TEN_MINUTES_MS: i64 = 600_000;

/// Wake later than this past the boundary gets a warning.
pub const WAKE_LAG_WARN_MS: i64 = 1_000;

/// First minute boundary strictly after `nominal_ms`.
pub fn next_minute_boundary_ms(nominal_ms: i64) -> i64 {
    next_boundary_ms(nominal_ms, MINUTE_MS)
}

/// First ten-minute boundary strictly after `nominal_ms`.
pub fn next_ten_minute_boundary_ms(nominal_ms: i64) -> i64 {
    next_boundary_ms(nominal_ms, TEN_MINUTES_MS)
}

fn next_boundary_ms(nominal_ms: i64, step_ms: i64) -> i64 {
    nominal_ms - nominal_ms.rem_euclid(step_ms) + step_ms
}

/// Whether the local hour falls inside the collection window.
pub fn is_working_hours(timestamp_ms: i64, tz: Tz, hours: &RangeInclusive<u32>) -> bool {
    tz.timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| hours.contains(&dt.hour()))
        .unwrap_or(false)
}

/// Log when the actual wake trails the nominal boundary noticeably.
pub fn report_wake_lag(label: &str, nominal_ms: i64, actual_ms: i64) {
    let lag = actual_ms - nominal_ms;
    if lag > WAKE_LAG_WARN_MS {
        warn!("{} loop woke {}ms after its boundary", label, lag);
    }
}

/// Sleep until `target_ms`, polling the stop flag every few hundred ms.
/// Returns false if stop was requested before the target.
pub fn sleep_until(target_ms: i64, stop: &AtomicBool) -> bool {
    const CHUNK_MS: i64 = 250;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = target_ms - crate::utils::now_ms();
        if remaining <= 0 {
            return true;
        }
        std::thread::sleep(Duration::from_millis(remaining.min(CHUNK_MS) as u64));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TZ: Tz = chrono_tz::Europe::Rome;

    fn local_ms(h: u32, m: u32) -> i64 {
        TZ.with_ymd_and_hms(2024, 1, 31, h, m, 0)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn minute_boundary_is_strictly_after_the_nominal_tick() {
        assert_eq!(next_minute_boundary_ms(0), MINUTE_MS);
        assert_eq!(next_minute_boundary_ms(1), MINUTE_MS);
        assert_eq!(next_minute_boundary_ms(MINUTE_MS - 1), MINUTE_MS);
        assert_eq!(next_minute_boundary_ms(MINUTE_MS), 2 * MINUTE_MS);
    }

    #[test]
    fn ten_minute_boundary_alignment() {
        assert_eq!(next_ten_minute_boundary_ms(0), TEN_MINUTES_MS);
        assert_eq!(next_ten_minute_boundary_ms(TEN_MINUTES_MS - 1), TEN_MINUTES_MS);
        assert_eq!(next_ten_minute_boundary_ms(TEN_MINUTES_MS + 1), 2 * TEN_MINUTES_MS);
    }

    #[test]
    fn boundaries_hold_for_negative_epochs() {
        assert_eq!(next_minute_boundary_ms(-1), 0);
        assert_eq!(next_minute_boundary_ms(-MINUTE_MS), -MINUTE_MS + MINUTE_MS);
    }

    #[test]
    fn working_hours_window_edges() {
        let hours = 8..=19;
        assert!(!is_working_hours(local_ms(7, 59), TZ, &hours));
        assert!(is_working_hours(local_ms(8, 0), TZ, &hours));
        assert!(is_working_hours(local_ms(19, 59), TZ, &hours));
        assert!(!is_working_hours(local_ms(20, 0), TZ, &hours));
    }

    #[test]
    fn sleep_until_past_target_returns_immediately() {
        let stop = AtomicBool::new(false);
        assert!(sleep_until(crate::utils::now_ms() - 10, &stop));
    }

    #[test]
    fn sleep_until_respects_the_stop_flag() {
        let stop = AtomicBool::new(true);
        assert!(!sleep_until(crate::utils::now_ms() + 60_000, &stop));
    }
}
