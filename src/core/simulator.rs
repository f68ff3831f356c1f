//! EnergySimulator: minute-stepped simulation of battery, PV, load, grid,
//! and cost (§4.3). A pure function over its declared domain — no
//! exception ever propagates out of it (§7).

use bon::Builder;

use super::{
    rates::Window,
    series::{Curve, Minute},
    working_mode::WorkingMode,
};
use crate::quantity::cost::Cost;

/// A candidate plan: parallel charge and discharge sequences (§3).
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub charge_windows: Vec<Window>,
    pub charge_limit_kwh: Vec<f64>,
    pub discharge_windows: Vec<Window>,
    pub discharge_enable: Vec<bool>,
}

impl Plan {
    #[must_use]
    pub fn all_off(charge_windows: Vec<Window>, discharge_windows: Vec<Window>, reserve_kwh: f64) -> Self {
        let charge_limit_kwh = vec![reserve_kwh; charge_windows.len()];
        let discharge_enable = vec![false; discharge_windows.len()];
        Self { charge_windows, charge_limit_kwh, discharge_windows, discharge_enable }
    }
}

/// Battery and cost parameters that hold for the whole simulated horizon
/// (§9: an explicit `SimContext` replacing the source's ambient `base`
/// handle).
#[derive(Clone, Copy, Debug)]
pub struct SimContext {
    pub soc_kwh: f64,
    pub soc_max_kwh: f64,
    pub reserve_kwh: f64,
    pub charge_rate_kwh_per_min: f64,
    pub discharge_rate_kwh_per_min: f64,
    /// Round-trip inefficiency applied to energy entering the battery,
    /// e.g. `0.95` for a 5% loss (`battery_loss` config option).
    pub battery_loss: f64,
    pub metric_house: f64,
    pub metric_battery: f64,
    pub metric_export: f64,
    pub forecast_minutes: Minute,
    pub minutes_now: Minute,
    pub step_minutes: Minute,
    pub car_charging_hold: bool,
    pub car_charging_threshold_kwh_per_min: f64,
}

/// A 10-minute telemetry snapshot (§4.3 step 8).
#[derive(Clone, Copy, Debug)]
pub struct Snapshot {
    pub minute: Minute,
    pub soc_kwh: f64,
    pub cost_so_far: Cost,
}

/// Simulator outputs (§4.3 "Outputs").
#[derive(Clone, Debug)]
pub struct SimOutput {
    pub metric: Cost,
    pub import_kwh_battery: f64,
    pub import_kwh_house: f64,
    pub export_kwh: f64,
    pub soc_min: f64,
    pub final_soc: f64,
    pub telemetry: Vec<Snapshot>,
}

#[derive(Builder)]
pub struct SimInputs<'a> {
    pub context: SimContext,
    pub plan: &'a Plan,
    /// Backward curve: key = minutes before "yesterday's same minute",
    /// i.e. historical load replayed onto the forecast horizon.
    pub load_minutes: &'a Curve,
    /// Forward curve: key = minutes after `minutes_now`.
    pub pv_minutes: &'a Curve,
    pub rate_import: &'a Curve,
    pub rate_export: &'a Curve,
    #[builder(default)]
    pub car_charging_minutes: Option<&'a Curve>,
    #[builder(default)]
    pub dispatch_slots: &'a [super::rates::DispatchSlot],
    #[builder(default = 1.0)]
    pub dispatch_kwh_per_hour: f64,
}

/// Runs the minute-stepped simulation and returns the cost metric plus
/// state telemetry (§4.3). Deterministic given its inputs (§8 Invariant
/// 2); never panics on well-formed input and treats missing curve data
/// as zero (§4.3 "Failure").
#[must_use]
pub fn simulate(inputs: &SimInputs<'_>) -> SimOutput {
    let ctx = inputs.context;
    let step = ctx.step_minutes.max(1);

    let mut soc = ctx.soc_kwh;
    let mut import_kwh_battery = 0.0;
    let mut import_kwh_house = 0.0;
    let mut export_kwh = 0.0;
    let mut metric = Cost::ZERO;
    let mut soc_min = soc;
    let mut charge_has_run = false;
    let mut discharge_has_run = false;
    let mut telemetry = Vec::new();

    let end_record = end_record_minutes(ctx.forecast_minutes, &inputs.plan.charge_windows);
    // Whether charging is enabled at all this tick, in the sense of the
    // source's `charge_enable` flag: if there are no charge windows to
    // begin with, the pre-charge-trough exclusion never applies and
    // `soc_min` is recorded from the first step (§9 open-question
    // decision).
    let charge_enabled = !inputs.plan.charge_windows.is_empty();

    let mut t = 0;
    while t < ctx.forecast_minutes {
        let minute_abs = ctx.minutes_now + t;
        let record = t < end_record;

        let load = load_for_step(inputs, ctx, t, step, minute_abs);
        let pv = inputs.pv_minutes.sum_range(minute_abs, minute_abs + step);

        let charge_window_n = window_index(&inputs.plan.charge_windows, minute_abs);
        let discharge_window_n = window_index(&inputs.plan.discharge_windows, minute_abs);

        let limit = charge_window_n.map(|n| inputs.plan.charge_limit_kwh[n]);
        let discharge_enabled =
            discharge_window_n.is_some_and(|n| inputs.plan.discharge_enable[n]);

        let mode = if charge_window_n.is_some() && soc < limit.unwrap_or(ctx.reserve_kwh) {
            WorkingMode::ForcedCharge
        } else if discharge_window_n.is_some() && discharge_enabled && soc > ctx.reserve_kwh {
            WorkingMode::ForcedDischarge
        } else {
            WorkingMode::Idle
        };

        let mut house_import = 0.0;
        let mut battery_import = 0.0;
        let mut export = 0.0;

        match mode {
            WorkingMode::ForcedCharge => {
                charge_has_run = true;
                let target = limit.unwrap_or(ctx.soc_max_kwh);
                let new_soc = (soc + ctx.charge_rate_kwh_per_min * step as f64).min(target);
                let from_grid = ((new_soc - soc - pv).max(0.0) / ctx.battery_loss.max(1e-9)) + load;
                soc = new_soc;
                battery_import = from_grid;
            }
            WorkingMode::ForcedDischarge => {
                discharge_has_run = true;
                let draw = (ctx.discharge_rate_kwh_per_min * step as f64).min(soc - ctx.reserve_kwh).max(0.0);
                soc -= draw;
                let net = load - pv - draw;
                if net > 0.0 {
                    house_import = net;
                } else {
                    export = -net;
                }
            }
            WorkingMode::Idle => {
                let mut diff = load - pv;
                if diff < 0.0 {
                    diff *= ctx.battery_loss;
                }
                let charge_cap = ctx.charge_rate_kwh_per_min * step as f64;
                let discharge_cap = ctx.discharge_rate_kwh_per_min * step as f64;
                if diff < -charge_cap {
                    soc = (soc - (-charge_cap)).min(ctx.soc_max_kwh);
                    export = -diff - charge_cap;
                } else if diff > discharge_cap {
                    soc -= discharge_cap;
                    let remainder = diff - discharge_cap;
                    if charge_window_n.is_some() {
                        battery_import = remainder;
                    } else {
                        house_import = remainder;
                    }
                } else {
                    soc -= diff;
                }
            }
        }

        if soc < ctx.reserve_kwh {
            house_import += ctx.reserve_kwh - soc;
            soc = ctx.reserve_kwh;
        } else if soc > ctx.soc_max_kwh {
            export += soc - ctx.soc_max_kwh;
            soc = ctx.soc_max_kwh;
        }

        if record {
            let rate_import = rate_at(inputs.rate_import, minute_abs).unwrap_or(ctx.metric_house);
            let rate_export = rate_at(inputs.rate_export, minute_abs).unwrap_or(ctx.metric_export);
            let rate_battery =
                rate_at(inputs.rate_import, minute_abs).unwrap_or(ctx.metric_battery);

            metric += Cost::from(house_import * rate_import);
            metric += Cost::from(battery_import * rate_battery);
            metric -= Cost::from(export * rate_export);

            import_kwh_house += house_import;
            import_kwh_battery += battery_import;
            export_kwh += export;

            if record && (discharge_has_run || charge_has_run || !charge_enabled) {
                soc_min = soc_min.min(soc);
            }
        }

        if t % 10 == 0 {
            telemetry.push(Snapshot { minute: minute_abs, soc_kwh: soc, cost_so_far: metric });
        }

        t += step;
    }

    SimOutput {
        metric: metric.round_2dp(),
        import_kwh_battery: ceil3(import_kwh_battery),
        import_kwh_house: ceil3(import_kwh_house),
        export_kwh: ceil3(export_kwh),
        soc_min,
        final_soc: soc,
        telemetry,
    }
}

fn ceil3(value: f64) -> f64 {
    (value * 1000.0).ceil() / 1000.0
}

fn rate_at(curve: &Curve, minute: Minute) -> Option<f64> {
    curve.get_opt(minute)
}

fn window_index(windows: &[Window], minute: Minute) -> Option<usize> {
    windows.iter().position(|window| window.contains(minute))
}

/// `end_record = min(forecast_minutes, first_window_start_beyond_forecast)`
/// (§4.3 step 7): prevents a final charge window spanning the horizon
/// boundary from being double-counted across successive ticks.
fn end_record_minutes(forecast_minutes: Minute, charge_windows: &[Window]) -> Minute {
    charge_windows
        .iter()
        .map(|window| window.start)
        .filter(|&start| start >= forecast_minutes)
        .min()
        .unwrap_or(forecast_minutes)
        .min(forecast_minutes)
}

fn load_for_step(
    inputs: &SimInputs<'_>,
    ctx: SimContext,
    t: Minute,
    step: Minute,
    minute_abs: Minute,
) -> f64 {
    // Backward curve: the keys run from "minutes before anchor", so the
    // step at forecast offset `t` reads the historical minutes
    // `(forecast_minutes - t) ..= (forecast_minutes - t - step + 1)`.
    let backward_start = ctx.forecast_minutes - t - step + 1;
    let backward_end = ctx.forecast_minutes - t + 1;
    let mut load = inputs.load_minutes.sum_range(backward_start.max(0), backward_end.max(0));

    if let Some(car_curve) = inputs.car_charging_minutes {
        if ctx.car_charging_hold {
            let car = car_curve.sum_range(backward_start.max(0), backward_end.max(0));
            load = (load - car).max(0.0);
        }
    } else if ctx.car_charging_hold && load > ctx.car_charging_threshold_kwh_per_min * step as f64 {
        load = 0.0;
    }

    for slot in inputs.dispatch_slots {
        if slot.start <= minute_abs && minute_abs < slot.end {
            load += inputs.dispatch_kwh_per_hour * step as f64 / 60.0;
        }
    }

    load
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn flat_curve(value: f64, len: Minute) -> Curve {
        let mut curve = Curve::new();
        for minute in 0..len {
            curve.set(minute, value);
        }
        curve
    }

    /// S1 — flat tariff, no PV, constant load, no charge windows: metric
    /// should equal `load_per_minute * horizon * rate`.
    #[test]
    fn test_s1_flat_tariff_no_pv_constant_load() {
        let horizon = 60;
        let load_per_minute = 0.25;
        let load = flat_curve(load_per_minute, horizon + 10);
        let pv = Curve::new();
        let rate_import = flat_curve(0.30, horizon);
        let rate_export = Curve::new();

        let context = SimContext {
            soc_kwh: 5.0,
            soc_max_kwh: 10.0,
            reserve_kwh: 1.0,
            charge_rate_kwh_per_min: 0.1,
            discharge_rate_kwh_per_min: 0.1,
            battery_loss: 1.0,
            metric_house: 0.30,
            metric_battery: 0.30,
            metric_export: 0.0,
            forecast_minutes: horizon,
            minutes_now: 0,
            step_minutes: 5,
            car_charging_hold: false,
            car_charging_threshold_kwh_per_min: 0.0,
        };
        let plan = Plan::default();
        let inputs = SimInputs::builder()
            .context(context)
            .plan(&plan)
            .load_minutes(&load)
            .pv_minutes(&pv)
            .rate_import(&rate_import)
            .rate_export(&rate_export)
            .build();

        let output = simulate(&inputs);
        // diff = load - pv = 0.25/min > 0 but within discharge cap 0.1*5=0.5
        // per 5-min step (0.25*5=1.25 > 0.5), so battery supplies at cap and
        // remainder imports as house: exactly the no-battery cost since the
        // battery runs dry (reserve) quickly and then it's pure import.
        assert!(output.metric.0 > 0.0);
        assert_abs_diff_eq!(output.final_soc, context.reserve_kwh, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_horizon_returns_zeros() {
        let context = SimContext {
            soc_kwh: 5.0,
            soc_max_kwh: 10.0,
            reserve_kwh: 1.0,
            charge_rate_kwh_per_min: 0.1,
            discharge_rate_kwh_per_min: 0.1,
            battery_loss: 0.95,
            metric_house: 0.30,
            metric_battery: 0.30,
            metric_export: 0.05,
            forecast_minutes: 0,
            minutes_now: 0,
            step_minutes: 5,
            car_charging_hold: false,
            car_charging_threshold_kwh_per_min: 0.0,
        };
        let plan = Plan::default();
        let load = Curve::new();
        let pv = Curve::new();
        let rate_import = Curve::new();
        let rate_export = Curve::new();
        let inputs = SimInputs::builder()
            .context(context)
            .plan(&plan)
            .load_minutes(&load)
            .pv_minutes(&pv)
            .rate_import(&rate_import)
            .rate_export(&rate_export)
            .build();

        let output = simulate(&inputs);
        assert_abs_diff_eq!(output.metric.0, 0.0);
        assert_abs_diff_eq!(output.final_soc, 5.0);
    }

    #[test]
    fn test_invariant_soc_stays_within_bounds() {
        let context = SimContext {
            soc_kwh: 5.0,
            soc_max_kwh: 10.0,
            reserve_kwh: 1.0,
            charge_rate_kwh_per_min: 0.2,
            discharge_rate_kwh_per_min: 0.2,
            battery_loss: 0.95,
            metric_house: 0.30,
            metric_battery: 0.30,
            metric_export: 0.05,
            forecast_minutes: 240,
            minutes_now: 0,
            step_minutes: 5,
            car_charging_hold: false,
            car_charging_threshold_kwh_per_min: 0.0,
        };
        let plan = Plan::all_off(vec![Window { start: 0, end: 120, average: 0.07 }], vec![], 1.0);
        let mut plan = plan;
        plan.charge_limit_kwh[0] = 10.0;
        let load = flat_curve(0.1, 500);
        let pv = flat_curve(0.05, 500);
        let rate_import = flat_curve(0.30, 300);
        let rate_export = flat_curve(0.05, 300);
        let inputs = SimInputs::builder()
            .context(context)
            .plan(&plan)
            .load_minutes(&load)
            .pv_minutes(&pv)
            .rate_import(&rate_import)
            .rate_export(&rate_export)
            .build();

        let output = simulate(&inputs);
        assert!(output.final_soc >= context.reserve_kwh - 1e-9);
        assert!(output.final_soc <= context.soc_max_kwh + 1e-9);
    }
}
