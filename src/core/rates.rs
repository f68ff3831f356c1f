//! RateModel: builds, replicates, and scans import/export rate curves
//! into candidate windows (§4.2).

use itertools::Itertools;

use super::series::{Curve, Minute};
use crate::quantity::rate::KilowattHourRate;

/// At most this many windows are returned by [`scan_windows`].
pub const MAX_CHARGE_LIMITS: usize = 16;

/// `[start, end)` minute range annotated with the mean rate across it.
/// `start` and `end` are offsets from local midnight and may exceed 1440
/// to encode future days (§3).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub start: Minute,
    pub end: Minute,
    pub average: f64,
}

impl Window {
    #[must_use]
    pub fn len(&self) -> Minute {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[must_use]
    pub fn contains(&self, minute: Minute) -> bool {
        minute >= self.start && minute < self.end
    }
}

/// One entry of a user-supplied tariff schedule, e.g. "23:00–07:00 at 7p".
pub struct ScheduleEntry {
    pub start_minute_of_day: Minute,
    pub end_minute_of_day: Minute,
    pub rate: f64,
}

/// Expands a schedule into a 24-hour curve; ranges that wrap past
/// midnight split correctly; unspecified minutes take `fallback_rate`
/// (§4.2 `basic_rates`).
#[must_use]
pub fn basic_rates(schedule: &[ScheduleEntry], fallback_rate: f64) -> Curve {
    let mut curve = Curve::new();
    for minute in 0..1440 {
        curve.set(minute, fallback_rate);
    }
    for entry in schedule {
        if entry.end_minute_of_day > entry.start_minute_of_day {
            for minute in entry.start_minute_of_day..entry.end_minute_of_day {
                curve.set(minute.rem_euclid(1440), entry.rate);
            }
        } else {
            // Wraps past midnight: [start, 1440) and [0, end).
            for minute in entry.start_minute_of_day..1440 {
                curve.set(minute, entry.rate);
            }
            for minute in 0..entry.end_minute_of_day {
                curve.set(minute, entry.rate);
            }
        }
    }
    curve
}

/// Extends a partial curve to `forecast_minutes + 24h` by copying from
/// `key mod 1440`, falling back to `house_rate` when the donor minute is
/// also missing (§4.2 `rate_replicate`). Idempotent (§8 Invariant 4).
#[must_use]
pub fn rate_replicate(curve: &Curve, forecast_minutes: Minute, house_rate: f64) -> Curve {
    curve.replicated(forecast_minutes + 1440, house_rate)
}

/// An externally scheduled low-rate slot, e.g. an EV provider's assigned
/// dispatch window.
pub struct DispatchSlot {
    pub start: Minute,
    pub end: Minute,
}

/// Overwrites each dispatch slot with `rate_min` (§4.2
/// `apply_dispatch_slots`).
pub fn apply_dispatch_slots(curve: &mut Curve, slots: &[DispatchSlot], rate_min: f64) {
    for slot in slots {
        curve.apply_dispatch_slot(slot.start, slot.end, rate_min);
    }
}

/// `(min, max, avg, min_minute, max_minute)` over `[0, forecast_minutes)`
/// (§4.2 `rate_minmax`).
#[must_use]
pub fn rate_minmax(curve: &Curve, forecast_minutes: Minute) -> (f64, f64, f64, Minute, Minute) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut min_minute = 0;
    let mut max_minute = 0;
    let mut sum = 0.0;
    for minute in 0..forecast_minutes {
        let value = curve.get(minute);
        sum += value;
        if value < min {
            min = value;
            min_minute = minute;
        }
        if value > max {
            max = value;
            max_minute = minute;
        }
    }
    let avg = if forecast_minutes > 0 { sum / forecast_minutes as f64 } else { 0.0 };
    (min, max, avg, min_minute, max_minute)
}

/// Sorts charge windows by ascending average rate, the order the greedy
/// optimizer's charge search consumes them in (§4.4 step 1), surfaced as
/// its own function per §11 so a reordering regression is independently
/// testable.
#[must_use]
pub fn sort_window_by_price(mut windows: Vec<Window>) -> Vec<Window> {
    windows.sort_by(|a, b| a.average.partial_cmp(&b.average).expect("rates are never NaN"));
    windows
}

/// Scans left-to-right, emitting maximal contiguous runs where the rate
/// is `<= threshold` (or `>= threshold` if `find_high`). A run continues
/// only while the rate is within two decimal places of the run's current
/// rate (§9 open-question decision: two-decimal equality gates window
/// splitting, the threshold test itself uses the raw rate). For
/// `find_high`, each emitted window is capped at 30 minutes. At most
/// [`MAX_CHARGE_LIMITS`] windows are returned. A window is kept only if
/// its end is `>= now` and its length is `>= min_window_len` (§4.2
/// `scan_windows`).
#[must_use]
pub fn scan_windows(
    curve: &Curve,
    forecast_minutes: Minute,
    now: Minute,
    min_window_len: Minute,
    threshold_rate: f64,
    find_high: bool,
) -> Vec<Window> {
    let mut windows = Vec::new();
    let mut run_start: Option<Minute> = None;
    let mut run_rate = 0.0;

    let passes = |rate: f64| if find_high { rate >= threshold_rate } else { rate <= threshold_rate };
    let same_run = |rate: f64, run_rate: f64| KilowattHourRate::from(rate).eq_2dp(KilowattHourRate::from(run_rate));

    let mut close_run = |windows: &mut Vec<Window>, start: Minute, end: Minute, curve: &Curve| {
        if end - start < min_window_len || end < now {
            return;
        }
        let (_, _, average) = curve.minmax_avg(start, end);
        if find_high {
            let mut cursor = start;
            while cursor < end {
                let segment_end = (cursor + 30).min(end);
                windows.push(Window { start: cursor, end: segment_end, average });
                cursor = segment_end;
            }
        } else {
            windows.push(Window { start, end, average });
        }
    };

    for minute in 0..forecast_minutes {
        let rate = curve.get(minute);
        match run_start {
            Some(start) if same_run(rate, run_rate) && passes(rate) => {
                // continue the run
                let _ = start;
            }
            Some(start) => {
                close_run(&mut windows, start, minute, curve);
                run_start = if passes(rate) { Some(minute) } else { None };
                run_rate = rate;
            }
            None if passes(rate) => {
                run_start = Some(minute);
                run_rate = rate;
            }
            None => {}
        }
        if windows.len() >= MAX_CHARGE_LIMITS * 4 {
            // Generous upper bound before trimming below; avoids runaway
            // allocation on pathological inputs before the final cap.
            break;
        }
    }
    if let Some(start) = run_start {
        close_run(&mut windows, start, forecast_minutes, curve);
    }

    windows.truncate(MAX_CHARGE_LIMITS);
    windows
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_basic_rates_wraps_midnight() {
        let schedule =
            [ScheduleEntry { start_minute_of_day: 23 * 60, end_minute_of_day: 7 * 60, rate: 0.07 }];
        let curve = basic_rates(&schedule, 0.30);
        assert_abs_diff_eq!(curve.get(23 * 60 + 30), 0.07);
        assert_abs_diff_eq!(curve.get(3 * 60), 0.07);
        assert_abs_diff_eq!(curve.get(12 * 60), 0.30);
    }

    #[test]
    fn test_scan_windows_non_overlapping_increasing_start() {
        let mut curve = Curve::new();
        for minute in 0..240 {
            curve.set(minute, 0.07);
        }
        for minute in 240..1440 {
            curve.set(minute, 0.30);
        }
        let windows = scan_windows(&curve, 1440, 0, 5, 0.20, false);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0], Window { start: 0, end: 240, average: 0.07 });
        for pair in windows.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_scan_windows_caps_high_windows_at_30_minutes() {
        let mut curve = Curve::new();
        for minute in 0..1440 {
            curve.set(minute, 0.30);
        }
        let windows = scan_windows(&curve, 120, 0, 5, 0.10, true);
        assert!(windows.iter().all(|window| window.len() <= 30));
    }

    #[test]
    fn test_single_rate_emits_no_window_below_threshold() {
        let mut curve = Curve::new();
        for minute in 0..1440 {
            curve.set(minute, 0.20);
        }
        let windows = scan_windows(&curve, 1440, 0, 5, 0.8 * 0.20, false);
        assert!(windows.is_empty());
    }

    #[test]
    fn test_sort_window_by_price_ascending() {
        let windows = vec![
            Window { start: 0, end: 10, average: 0.30 },
            Window { start: 10, end: 20, average: 0.07 },
        ];
        let sorted = sort_window_by_price(windows);
        assert_abs_diff_eq!(sorted[0].average, 0.07);
    }
}
