//! MinuteSeries: normalizes sparse event history into dense per-minute
//! curves (§4.1).

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::prelude::*;

/// Minute offset, relative to an anchor whose meaning (local midnight,
/// "now") is a property of the curve, not the type. May be negative or
/// exceed 1440 to encode adjacent days.
pub type Minute = i64;

/// A dense-in-range mapping from minute offset to value. A missing key is
/// treated as zero by every consumer in this crate (§3: "a missing key is
/// treated as zero by consumers").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Curve(BTreeMap<Minute, f64>);

impl Curve {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn set(&mut self, minute: Minute, value: f64) {
        self.0.insert(minute, value);
    }

    #[must_use]
    pub fn get(&self, minute: Minute) -> f64 {
        self.0.get(&minute).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn get_opt(&self, minute: Minute) -> Option<f64> {
        self.0.get(&minute).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Sum of `get(minute)` over `[start, end)`, used by the simulator to
    /// integrate load and PV power over a step.
    #[must_use]
    pub fn sum_range(&self, start: Minute, end: Minute) -> f64 {
        (start..end).map(|minute| self.get(minute)).sum()
    }

    /// Multiply every value in place.
    pub fn scale(&mut self, factor: f64) {
        for value in self.0.values_mut() {
            *value *= factor;
        }
    }

    /// Divide every value in place (used for forecasts given in
    /// 30-minute energy windows converted to per-minute power).
    pub fn divide_by(&mut self, divisor: f64) {
        for value in self.0.values_mut() {
            *value /= divisor;
        }
    }

    /// Add `other`'s values onto `self`, used to combine multiple meters
    /// of the same role (§4.1 `accumulate`).
    pub fn accumulate(&mut self, other: &Self) {
        for (&minute, &value) in &other.0 {
            *self.0.entry(minute).or_insert(0.0) += value;
        }
    }

    /// Extend a partial forward curve to `[0, horizon)` by copying from
    /// `minute mod 1440`, falling back to `fallback` when the donor
    /// minute is also missing (§4.2 `rate_replicate`). Idempotent:
    /// applying twice yields the same curve (§8 Invariant 4), because
    /// every filled key is copied from an already-resolved donor or the
    /// constant fallback.
    #[must_use]
    pub fn replicated(&self, horizon: Minute, fallback: f64) -> Self {
        let mut out = self.clone();
        for minute in 0..horizon {
            if out.0.contains_key(&minute) {
                continue;
            }
            let donor = minute.rem_euclid(1440);
            let value = self.0.get(&donor).copied().unwrap_or(fallback);
            out.0.insert(minute, value);
        }
        out
    }

    /// Overwrite `[start, end)` with `rate`, used to splice externally
    /// scheduled dispatch slots into a rate curve (§4.2
    /// `apply_dispatch_slots`).
    pub fn apply_dispatch_slot(&mut self, start: Minute, end: Minute, rate: f64) {
        for minute in start..end {
            self.0.insert(minute, rate);
        }
    }

    /// `(min, max, avg)` over `[start, end)`; missing minutes count as
    /// zero, matching `get`.
    #[must_use]
    pub fn minmax_avg(&self, start: Minute, end: Minute) -> (f64, f64, f64) {
        if end <= start {
            return (0.0, 0.0, 0.0);
        }
        let values: Vec<f64> = (start..end).map(|minute| self.get(minute)).collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = values.iter().sum::<f64>() / values.len() as f64;
        (min, max, avg)
    }

    /// The p-th percentile (0..=100) over `[start, end)`, linearly
    /// interpolated between order statistics. Used to derive the P10 PV
    /// scenario from an hourly distribution of historical yields.
    #[must_use]
    pub fn quantile(&self, start: Minute, end: Minute, p: f64) -> f64 {
        let mut values: Vec<f64> =
            (start..end).map(|minute| OrderedFloat(self.get(minute))).sorted_unstable().map(|v| v.0).collect();
        if values.is_empty() {
            return 0.0;
        }
        if values.len() == 1 {
            return values[0];
        }
        let rank = (p / 100.0) * (values.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let frac = rank - lower as f64;
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        values[lower] + (values[upper] - values[lower]) * frac
    }
}

/// One history sample as read from a state service, before numeric
/// parsing. `state` is `None` for the literal sentinels "unavailable" and
/// "unknown", or absent entirely.
#[derive(Clone, Debug)]
pub struct RawSample {
    pub state: Option<String>,
    pub timestamp: DateTime<Local>,
    /// Present for samples that cover an interval (e.g. forecast slots),
    /// absent for point-in-time meter readings.
    pub end_timestamp: Option<DateTime<Local>>,
}

/// A parsed, numeric sample ready for `minute_data`.
#[derive(Clone, Copy, Debug)]
struct Event {
    value: f64,
    minute: Minute,
    end_minute: Option<Minute>,
}

fn parse_samples(samples: &[RawSample], anchor: DateTime<Local>, backward: bool) -> Vec<Event> {
    samples
        .iter()
        .filter_map(|sample| {
            let text = sample.state.as_deref()?;
            if text.eq_ignore_ascii_case("unavailable") || text.eq_ignore_ascii_case("unknown") {
                return None;
            }
            let value = text.parse::<f64>().ok()?;
            let to_key = |ts: DateTime<Local>| -> Minute {
                let delta = (ts - anchor).num_minutes();
                if backward { -delta } else { delta }
            };
            let minute = to_key(sample.timestamp);
            let end_minute = sample.end_timestamp.map(to_key);
            Some(Event { value, minute, end_minute })
        })
        .collect()
}

/// Converts a sequence of `(state, timestamp[, end_timestamp])` samples
/// into a dense per-minute curve (§4.1).
///
/// `days` bounds how far back (backward curves) or forward (forward
/// curves) the output extends from `anchor`, in whole days.
pub struct MinuteDataArgs<'a> {
    pub samples: &'a [RawSample],
    pub anchor: DateTime<Local>,
    pub days: i64,
    pub backward: bool,
    pub has_to_key: bool,
    pub smoothing: bool,
    pub clean_increment: bool,
    pub scale: f64,
    pub divide_by: f64,
    pub accumulate_onto: Option<&'a Curve>,
}

#[instrument(skip_all)]
pub fn minute_data(args: MinuteDataArgs<'_>) -> Curve {
    if args.samples.is_empty() {
        warn!("minute_data: no samples, returning empty curve");
        let mut curve = Curve::new();
        if let Some(existing) = args.accumulate_onto {
            curve.accumulate(existing);
        }
        return curve;
    }

    let horizon = args.days * 1440;
    let mut events = parse_samples(args.samples, args.anchor, args.backward);
    events.sort_by_key(|event| event.minute);

    let mut curve = Curve::new();

    if args.clean_increment {
        fill_clean_incrementing(&mut curve, &events, horizon);
    } else if args.has_to_key {
        fill_interval_events(&mut curve, &events, horizon, args.smoothing);
    } else {
        fill_point_events(&mut curve, &events, horizon, args.backward);
    }

    if args.scale != 1.0 {
        curve.scale(args.scale);
    }
    if args.divide_by != 1.0 {
        curve.divide_by(args.divide_by);
    }
    if let Some(existing) = args.accumulate_onto {
        curve.accumulate(existing);
    }
    curve
}

/// Each event covers `[minute, end_minute)`; with `smoothing`, linearly
/// interpolate between the previous and current value across the span
/// rather than stepping. A drop to zero is a reset (fills forward at
/// zero); a non-reset backward movement is clamped to the prior value.
fn fill_interval_events(curve: &mut Curve, events: &[Event], horizon: Minute, smoothing: bool) {
    let mut previous_value = events.first().map_or(0.0, |event| event.value);
    for window in events.iter().collect::<Vec<_>>().windows(2) {
        let [current, next] = window else { continue };
        let end = current.end_minute.unwrap_or(next.minute).min(horizon);
        let start = current.minute.max(0);
        if end <= start {
            previous_value = current.value;
            continue;
        }
        let span = (end - start).max(1) as f64;
        for minute in start..end {
            let value = if smoothing && current.value != 0.0 {
                let frac = (minute - start) as f64 / span;
                previous_value + (current.value - previous_value) * frac
            } else if smoothing && current.value == 0.0 {
                // reset: fill forward at zero
                0.0
            } else if current.value < previous_value && !smoothing {
                previous_value
            } else {
                current.value
            };
            curve.set(minute, value);
        }
        previous_value = current.value;
    }
    if let Some(last) = events.last() {
        let start = last.minute.max(0);
        let end = last.end_minute.unwrap_or(horizon).min(horizon);
        for minute in start..end {
            curve.set(minute, last.value);
        }
    }
}

/// Each event stands alone at its minute, filling backward to the
/// previous event's minute (backward mode) or forward to the next. Gaps
/// before the oldest sample are forward-filled with the newest value.
fn fill_point_events(curve: &mut Curve, events: &[Event], horizon: Minute, backward: bool) {
    for pair in events.windows(2) {
        let [earlier, later] = pair else { continue };
        let (start, end, value) =
            if backward { (earlier.minute, later.minute, later.value) } else { (earlier.minute, later.minute, earlier.value) };
        for minute in start.max(0)..end.min(horizon) {
            curve.set(minute, value);
        }
    }
    // Forward-fill-backward: gaps before the oldest sample take the
    // newest (first, in backward orientation) value.
    if let Some(newest) = events.first() {
        for minute in 0..newest.minute.max(0) {
            curve.set(minute, newest.value);
        }
    }
    if let Some(last) = events.last() {
        for minute in last.minute.max(0)..horizon {
            curve.set(minute, last.value);
        }
    }
}

/// Treats the series as a monotonically-increasing counter observed
/// backward in time; computes cumulative increments in newest→oldest
/// direction after removing resets, so that `increment[i] -
/// increment[i+1]` recovers per-minute consumption (§4.1, §8 Invariant 8).
fn fill_clean_incrementing(curve: &mut Curve, events: &[Event], horizon: Minute) {
    let samples: Vec<(Minute, f64)> = events.iter().map(|event| (event.minute, event.value)).collect();
    let increments = clean_incrementing_reverse(&samples);
    for (minute, value) in increments {
        if minute >= 0 && minute < horizon {
            curve.set(minute, value);
        }
    }
}

/// Standalone, independently testable operation (§11): given `(minute,
/// raw_reading)` samples in increasing-minute (i.e. oldest-to-newest)
/// order, where a newer reading is normally ≥ the older one except at
/// meter resets, returns the cumulative increment at each sample's
/// minute, accumulated from the newest sample backward. A reset is any
/// minute where the newer sample's raw value is < the older one; such
/// deltas are dropped rather than subtracted, so the running total only
/// ever grows and subsequent differencing never produces negative values
/// (§8 Invariant 8).
#[must_use]
pub fn clean_incrementing_reverse(samples: &[(Minute, f64)]) -> Vec<(Minute, f64)> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut running = 0.0;
    let mut out = Vec::with_capacity(samples.len());
    for pair in samples.windows(2).rev() {
        let [(_, older), (newer_minute, newer)] = pair else { continue };
        let delta = newer - older;
        if delta >= 0.0 {
            running += delta;
        }
        out.push((*newer_minute, running));
    }
    out.push((samples[0].0, running));
    out.reverse();
    out
}

/// Resample a curve to hourly points by averaging each hour's 60 minutes,
/// used for stand-by load and solar-yield baselines.
#[must_use]
pub fn average_hourly(curve: &Curve, hours: i64) -> Vec<f64> {
    (0..hours)
        .map(|hour| {
            let (start, end) = (hour * 60, hour * 60 + 60);
            let (_, _, avg) = curve.minmax_avg(start, end);
            avg
        })
        .collect()
}

/// Per hour-of-day, the `p`-th percentile across `days` of a backward
/// curve (key = minutes before anchor), used to derive a pessimistic PV
/// forecast from historical solar yield without a dedicated weather
/// collaborator (§8 S5 "PV-P10 risk aversion").
#[must_use]
pub fn hourly_quantile_profile(curve: &Curve, days: i64, p: f64) -> Vec<f64> {
    (0..24)
        .map(|hour| {
            let mut samples: Vec<f64> = (0..days)
                .map(|day| curve.get(day * 1440 + hour * 60))
                .collect();
            samples.sort_by(|a, b| a.partial_cmp(b).expect("samples are never NaN"));
            if samples.is_empty() {
                return 0.0;
            }
            let rank = (p / 100.0) * (samples.len() - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let frac = rank - lower as f64;
            samples[lower] + (samples[upper] - samples[lower]) * frac
        })
        .collect()
}

/// Expands a 24-entry hourly profile into a forward minute curve
/// covering `[0, forecast_minutes)`, repeating the daily profile for
/// each additional day in the horizon (used to turn a historical
/// average solar-yield profile into a same-shape forecast when no
/// dedicated weather forecast collaborator is available).
#[must_use]
pub fn forecast_from_hourly(hourly: &[f64], forecast_minutes: Minute) -> Curve {
    let mut curve = Curve::new();
    if hourly.is_empty() {
        return curve;
    }
    for minute in 0..forecast_minutes {
        let hour = ((minute.rem_euclid(1440)) / 60) as usize % hourly.len();
        curve.set(minute, hourly[hour]);
    }
    curve
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_replicated_is_idempotent() {
        let mut curve = Curve::new();
        curve.set(0, 1.0);
        curve.set(100, 2.0);
        let once = curve.replicated(2000, 9.0);
        let twice = once.replicated(2000, 9.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_replicated_copies_modulo_day() {
        let mut curve = Curve::new();
        curve.set(10, 5.0);
        let replicated = curve.replicated(1440 * 2, 0.0);
        assert_abs_diff_eq!(replicated.get(1440 + 10), 5.0);
    }

    #[test]
    fn test_missing_key_is_zero() {
        let curve = Curve::new();
        assert_abs_diff_eq!(curve.get(42), 0.0);
    }

    #[test]
    fn test_accumulate_sums() {
        let mut a = Curve::new();
        a.set(0, 1.0);
        let mut b = Curve::new();
        b.set(0, 2.0);
        b.set(1, 3.0);
        a.accumulate(&b);
        assert_abs_diff_eq!(a.get(0), 3.0);
        assert_abs_diff_eq!(a.get(1), 3.0);
    }

    #[test]
    fn test_clean_incrementing_reverse_never_negative() {
        // Oldest-to-newest raw meter readings, with a reset between minute
        // 1 and minute 2 (value drops from 80 back to 70).
        let samples = [(0, 100.0), (1, 80.0), (2, 70.0)];
        let out = clean_incrementing_reverse(&samples);
        for window in out.windows(2) {
            let diff = window[0].1 - window[1].1;
            assert!(diff >= -1e-9, "difference must never be negative: {diff}");
        }
    }

    #[test]
    fn test_quantile_of_uniform_curve() {
        let mut curve = Curve::new();
        for minute in 0..10 {
            curve.set(minute, minute as f64);
        }
        let p50 = curve.quantile(0, 10, 50.0);
        assert_abs_diff_eq!(p50, 4.5);
    }

    #[test]
    fn test_hourly_quantile_profile_picks_low_day() {
        let mut curve = Curve::new();
        // Two days of history at hour 5: day 0 (closer to anchor) = 2.0, day 1 = 1.0.
        curve.set(5 * 60, 2.0);
        curve.set(1440 + 5 * 60, 1.0);
        let p10 = hourly_quantile_profile(&curve, 2, 10.0);
        assert_abs_diff_eq!(p10[5], 1.0 + (2.0 - 1.0) * 0.1, epsilon = 1e-9);
    }

    #[test]
    fn test_forecast_from_hourly_repeats_daily_profile() {
        let hourly: Vec<f64> = (0..24).map(f64::from).collect();
        let curve = forecast_from_hourly(&hourly, 1440 * 2);
        assert_abs_diff_eq!(curve.get(30), 0.0);
        assert_abs_diff_eq!(curve.get(1440 + 30), 0.0);
        assert_abs_diff_eq!(curve.get(1440 + 60 + 5), 1.0);
    }
}
