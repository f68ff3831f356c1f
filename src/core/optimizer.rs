//! PlanOptimizer: greedy coordinate-descent over per-window SOC and
//! discharge enablement (§4.4). Deliberately NOT a globally optimal
//! mixed-integer solve (§1 Non-goals) — this sorts candidate windows by
//! price and walks each one independently, accepting a change only when
//! it clears a minimum-improvement gate, to avoid flip-flopping on
//! near-ties.

use bon::Builder;

use super::{
    rates::{Window, sort_window_by_price},
    series::{Curve, Minute},
    simulator::{Plan, SimContext, SimInputs, simulate},
};
use crate::quantity::cost::Cost;

#[derive(Clone, Copy, Debug)]
pub struct OptimizerParams {
    pub best_soc_step: f64,
    pub best_soc_min: f64,
    pub best_soc_margin: f64,
    pub best_soc_keep: f64,
    pub metric_min_improvement: f64,
    pub pv_metric10_weight: f64,
    pub rate_min: f64,
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            best_soc_step: 0.5,
            best_soc_min: 0.0,
            best_soc_margin: 0.0,
            best_soc_keep: 0.0,
            metric_min_improvement: 0.0,
            pv_metric10_weight: 0.5,
            rate_min: 0.0,
        }
    }
}

#[derive(Builder)]
pub struct OptimizeInputs<'a> {
    pub context: SimContext,
    pub params: OptimizerParams,
    pub charge_windows: Vec<Window>,
    pub discharge_windows: Vec<Window>,
    pub load_minutes: &'a Curve,
    /// Central PV forecast.
    pub pv_minutes: &'a Curve,
    /// Pessimistic 10th-percentile PV forecast.
    pub pv_minutes_p10: &'a Curve,
    pub rate_import: &'a Curve,
    pub rate_export: &'a Curve,
}

/// Composite metric: the central-forecast cost, plus a risk premium for
/// how much worse the pessimistic-PV run would be, minus credit for
/// leftover battery charge at the cheapest known rate (§4.4 step 3).
fn composite_metric(context: SimContext, params: OptimizerParams, plan: &Plan, inputs: &OptimizeInputs<'_>) -> (f64, f64) {
    let mid = simulate(
        &SimInputs::builder()
            .context(context)
            .plan(plan)
            .load_minutes(inputs.load_minutes)
            .pv_minutes(inputs.pv_minutes)
            .rate_import(inputs.rate_import)
            .rate_export(inputs.rate_export)
            .build(),
    );
    let p10 = simulate(
        &SimInputs::builder()
            .context(context)
            .plan(plan)
            .load_minutes(inputs.load_minutes)
            .pv_minutes(inputs.pv_minutes_p10)
            .rate_import(inputs.rate_import)
            .rate_export(inputs.rate_export)
            .build(),
    );
    let penalty = (p10.metric.0 - mid.metric.0).max(0.0) * params.pv_metric10_weight;
    let composite = mid.metric.0 + penalty - mid.final_soc * params.rate_min;
    (composite, mid.soc_min)
}

/// Truncates `charge_windows` at the first window whose start is beyond
/// the forecast horizon (§4.4 "Window count cap", `record_length`).
#[must_use]
fn record_length(charge_windows: &[Window], forecast_minutes: Minute) -> usize {
    charge_windows.iter().position(|window| window.start >= forecast_minutes).unwrap_or(charge_windows.len())
}

/// Runs the full greedy search and returns the optimized plan (§4.4).
#[must_use]
pub fn optimize(inputs: OptimizeInputs<'_>) -> Plan {
    let context = inputs.context;
    let params = inputs.params;

    let record_windows = record_length(&inputs.charge_windows, context.forecast_minutes).max(1);
    let charge_windows = inputs.charge_windows.clone();
    let discharge_windows = inputs.discharge_windows.clone();

    let mut plan = Plan::all_off(charge_windows.clone(), discharge_windows.clone(), context.reserve_kwh);

    // Charge search: sort by ascending price, sweep each window's SOC
    // target downward from soc_max.
    let sorted = sort_window_by_price(charge_windows.clone());
    for window in &sorted {
        let Some(index) = charge_windows.iter().position(|w| w == window) else { continue };
        if index >= record_windows {
            continue;
        }

        let floor = params.best_soc_min.max(context.reserve_kwh);
        let step = params.best_soc_step.max(0.1);
        let mut best_soc = context.reserve_kwh;
        let (mut best_metric, _) = composite_metric(context, params, &plan, &inputs);
        let mut try_soc = context.soc_max_kwh;
        let mut previous_clamped = f64::NAN;

        loop {
            let clamped = try_soc.clamp(floor, context.soc_max_kwh);
            if clamped == previous_clamped {
                break; // stopped decreasing: clamped against the floor
            }
            previous_clamped = clamped;

            let mut candidate = plan.clone();
            candidate.charge_limit_kwh[index] = clamped;
            let (metric, soc_min) = composite_metric(context, params, &candidate, &inputs);

            let improved = best_metric - metric >= params.metric_min_improvement / record_windows as f64;
            if improved && soc_min >= params.best_soc_keep {
                best_metric = metric;
                best_soc = clamped;
            }

            if clamped <= floor {
                break;
            }
            try_soc -= step;
        }

        plan.charge_limit_kwh[index] = (best_soc + params.best_soc_margin).min(context.soc_max_kwh);
    }

    // Discharge search: natural order, try false then true.
    for index in 0..discharge_windows.len() {
        let (baseline_metric, _) = composite_metric(context, params, &plan, &inputs);
        let mut candidate = plan.clone();
        candidate.discharge_enable[index] = true;
        let (metric, soc_min) = composite_metric(context, params, &candidate, &inputs);

        let improved = baseline_metric - metric >= params.metric_min_improvement / record_windows as f64;
        if improved && soc_min >= params.best_soc_keep {
            plan.discharge_enable[index] = true;
        }
    }

    prune_unused_charge_slots(&mut plan, context.reserve_kwh);
    merge_discharge_windows(&mut plan);
    plan
}

/// Charge slots with `limit == reserve` are dropped, but at least one is
/// retained to preserve index semantics downstream (§4.4
/// "Unused-slot pruning").
fn prune_unused_charge_slots(plan: &mut Plan, reserve_kwh: f64) {
    if plan.charge_windows.len() <= 1 {
        return;
    }
    let keep: Vec<usize> = plan
        .charge_limit_kwh
        .iter()
        .enumerate()
        .filter(|&(_, &limit)| (limit - reserve_kwh).abs() > 1e-9)
        .map(|(index, _)| index)
        .collect();
    let keep = if keep.is_empty() { vec![0] } else { keep };

    let windows = keep.iter().map(|&index| plan.charge_windows[index]).collect();
    let limits = keep.iter().map(|&index| plan.charge_limit_kwh[index]).collect();
    plan.charge_windows = windows;
    plan.charge_limit_kwh = limits;
}

/// Adjacent enabled windows (`win[i].end == win[i+1].start`) are merged
/// into one (§4.4 "Discharge merging"). Unbounded merge length (§9 open
/// question, decided: the source has no cap either).
fn merge_discharge_windows(plan: &mut Plan) {
    let mut merged_windows = Vec::new();
    let mut merged_enable = Vec::new();

    let mut index = 0;
    while index < plan.discharge_windows.len() {
        let mut window = plan.discharge_windows[index];
        let enabled = plan.discharge_enable[index];
        if enabled {
            let mut next = index + 1;
            while next < plan.discharge_windows.len()
                && plan.discharge_enable[next]
                && plan.discharge_windows[next].start == window.end
            {
                window.end = plan.discharge_windows[next].end;
                next += 1;
            }
            index = next;
        } else {
            index += 1;
        }
        merged_windows.push(window);
        merged_enable.push(enabled);
    }

    plan.discharge_windows = merged_windows;
    plan.discharge_enable = merged_enable;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_curve(value: f64, len: Minute) -> Curve {
        let mut curve = Curve::new();
        for minute in 0..len {
            curve.set(minute, value);
        }
        curve
    }

    /// S2 — a cheap overnight window should be selected over "off".
    #[test]
    fn test_s2_picks_soc_target_for_cheap_window() {
        let context = SimContext {
            soc_kwh: 1.0,
            soc_max_kwh: 10.0,
            reserve_kwh: 1.0,
            charge_rate_kwh_per_min: 0.1,
            discharge_rate_kwh_per_min: 0.1,
            battery_loss: 0.95,
            metric_house: 0.30,
            metric_battery: 0.30,
            metric_export: 0.0,
            forecast_minutes: 1440,
            minutes_now: 0,
            step_minutes: 5,
            car_charging_hold: false,
            car_charging_threshold_kwh_per_min: 0.0,
        };
        let charge_windows = vec![Window { start: 0, end: 240, average: 0.07 }];
        let load = flat_curve(0.05, 1440);
        let pv = Curve::new();
        let rate_import = {
            let mut curve = flat_curve(0.30, 1440);
            for minute in 0..240 {
                curve.set(minute, 0.07);
            }
            curve
        };
        let rate_export = Curve::new();

        let params = OptimizerParams { rate_min: 0.07, ..Default::default() };
        let plan = optimize(
            OptimizeInputs::builder()
                .context(context)
                .params(params)
                .charge_windows(charge_windows.clone())
                .discharge_windows(vec![])
                .load_minutes(&load)
                .pv_minutes(&pv)
                .pv_minutes_p10(&pv)
                .rate_import(&rate_import)
                .rate_export(&rate_export)
                .build(),
        );

        assert!(plan.charge_limit_kwh[0] > context.reserve_kwh);

        let baseline = Plan::all_off(charge_windows, vec![], context.reserve_kwh);
        let (baseline_metric, _) = composite_metric(
            context,
            params,
            &baseline,
            &OptimizeInputs::builder()
                .context(context)
                .params(params)
                .charge_windows(vec![])
                .discharge_windows(vec![])
                .load_minutes(&load)
                .pv_minutes(&pv)
                .pv_minutes_p10(&pv)
                .rate_import(&rate_import)
                .rate_export(&rate_export)
                .build(),
        );
        let (plan_metric, _) = composite_metric(
            context,
            params,
            &plan,
            &OptimizeInputs::builder()
                .context(context)
                .params(params)
                .charge_windows(vec![])
                .discharge_windows(vec![])
                .load_minutes(&load)
                .pv_minutes(&pv)
                .pv_minutes_p10(&pv)
                .rate_import(&rate_import)
                .rate_export(&rate_export)
                .build(),
        );
        assert!(plan_metric <= baseline_metric);
    }

    #[test]
    fn test_merge_discharge_windows_contiguous() {
        let mut plan = Plan {
            charge_windows: vec![],
            charge_limit_kwh: vec![],
            discharge_windows: vec![
                Window { start: 0, end: 30, average: 0.30 },
                Window { start: 30, end: 60, average: 0.30 },
            ],
            discharge_enable: vec![true, true],
        };
        merge_discharge_windows(&mut plan);
        assert_eq!(plan.discharge_windows.len(), 1);
        assert_eq!(plan.discharge_windows[0].start, 0);
        assert_eq!(plan.discharge_windows[0].end, 60);
    }

    #[test]
    fn test_prune_unused_charge_slots_keeps_at_least_one() {
        let mut plan = Plan {
            charge_windows: vec![
                Window { start: 0, end: 10, average: 0.1 },
                Window { start: 10, end: 20, average: 0.2 },
            ],
            charge_limit_kwh: vec![1.0, 1.0],
            discharge_windows: vec![],
            discharge_enable: vec![],
        };
        prune_unused_charge_slots(&mut plan, 1.0);
        assert_eq!(plan.charge_windows.len(), 1);
    }

    #[test]
    fn test_zero_horizon_optimizer_returns_empty_plan() {
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
        let load = Curve::new();
        let pv = Curve::new();
        let rate_import = Curve::new();
        let rate_export = Curve::new();
        let plan = optimize(
            OptimizeInputs::builder()
                .context(context)
                .params(OptimizerParams::default())
                .charge_windows(vec![])
                .discharge_windows(vec![])
                .load_minutes(&load)
                .pv_minutes(&pv)
                .pv_minutes_p10(&pv)
                .rate_import(&rate_import)
                .rate_export(&rate_export)
                .build(),
        );
        assert!(plan.charge_windows.is_empty());
        assert!(plan.discharge_windows.is_empty());
    }
}
