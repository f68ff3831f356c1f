//! Orchestrator: per-tick pipeline wiring collaborator inputs through
//! simulate → optimize → program (§4.6). Nothing here reaches back into
//! a mega-object (§9 "Ambient state handed to subordinates") — every
//! subordinate call takes the explicit [`SimContext`]/[`OptimizeInputs`]
//! records built fresh each tick.

use chrono::{DateTime, Local, NaiveTime, Timelike};

use super::{
    config::Config,
    inverter::InverterDriver,
    optimizer::{OptimizeInputs, OptimizerParams, optimize},
    rates::{DispatchSlot, Window},
    series::{Curve, Minute},
    simulator::{Plan, SimContext, SimInputs, SimOutput, Snapshot, simulate},
};
use crate::prelude::*;

/// Aggregate inverter state read at tick start (§3 "Inverter state").
/// When multiple inverters are present, `soc`/`soc_max`/`reserve` are
/// summed and the first scheduled inverter supplies the authoritative
/// window, matching the lockstep assumption in §3.
#[derive(Clone, Copy, Debug)]
pub struct InverterState {
    pub soc_kwh: f64,
    pub soc_max_kwh: f64,
    pub reserve_kwh: f64,
    pub charge_rate_kwh_per_min: f64,
    pub discharge_rate_kwh_per_min: f64,
    pub charge_window: Option<(NaiveTime, NaiveTime)>,
    pub current_charge_limit_pct: u8,
    pub scheduled_charge_enabled: bool,
}

impl InverterState {
    /// Aggregates several inverters assumed to run in lockstep (§3).
    #[must_use]
    pub fn aggregate(states: &[Self]) -> Option<Self> {
        let first = states.first()?;
        Some(Self {
            soc_kwh: states.iter().map(|state| state.soc_kwh).sum(),
            soc_max_kwh: states.iter().map(|state| state.soc_max_kwh).sum(),
            reserve_kwh: states.iter().map(|state| state.reserve_kwh).sum(),
            charge_rate_kwh_per_min: first.charge_rate_kwh_per_min,
            discharge_rate_kwh_per_min: first.discharge_rate_kwh_per_min,
            charge_window: first.charge_window,
            current_charge_limit_pct: first.current_charge_limit_pct,
            scheduled_charge_enabled: first.scheduled_charge_enabled,
        })
    }

    /// The currently-configured plan, reconstructed from the inverter's
    /// own idea of its schedule, used as the baseline the optimized plan
    /// is compared against.
    #[must_use]
    fn as_baseline_plan(&self) -> Plan {
        let Some((start, end)) = self.charge_window else {
            return Plan::default();
        };
        let window = Window {
            start: Minute::from(start.num_seconds_from_midnight() / 60),
            end: Minute::from(end.num_seconds_from_midnight() / 60),
            average: 0.0,
        };
        let limit = if self.scheduled_charge_enabled {
            self.soc_max_kwh * f64::from(self.current_charge_limit_pct) / 100.0
        } else {
            self.reserve_kwh
        };
        Plan {
            charge_windows: vec![window],
            charge_limit_kwh: vec![limit],
            discharge_windows: vec![],
            discharge_enable: vec![],
        }
    }
}

/// Derived from the active window at `minutes_now` (§4.6).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Idle,
    Charging,
    Discharging,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Idle => "Idle",
            Self::Charging => "Charging",
            Self::Discharging => "Discharging",
        };
        write!(f, "{text}")
    }
}

/// The normalized, already-aggregated inputs for one tick — the output
/// of "read all inputs", handed wholesale to `tick` so that no output is
/// written before every input has been gathered (§5 "Ordering
/// guarantees").
pub struct TickInputs<'a> {
    pub now: DateTime<Local>,
    pub inverter: InverterState,
    pub load_minutes: &'a Curve,
    pub pv_minutes: &'a Curve,
    pub pv_minutes_p10: &'a Curve,
    pub rate_import: &'a Curve,
    pub rate_export: &'a Curve,
    pub car_charging_minutes: Option<&'a Curve>,
    pub dispatch_slots: &'a [DispatchSlot],
    pub charge_windows: Vec<Window>,
    pub discharge_windows: Vec<Window>,
    pub rate_min: f64,
}

/// Published once per tick as state entities (§6 "User-facing plan
/// output"), each series a 10-minute-resolution mapping from absolute
/// minute offset to value; the caller attaches the RFC-3339 timestamps
/// when it writes these out through the state service.
pub struct TickOutput {
    pub status: Status,
    pub baseline_metric: f64,
    pub best_metric: f64,
    pub soc_over_time: Vec<Snapshot>,
    pub soc_over_time_p10: Vec<Snapshot>,
    pub import_kwh_battery: f64,
    pub import_kwh_house: f64,
    pub export_kwh: f64,
    pub plan: Plan,
    /// Today's running import cost, a zero-horizon special case of the
    /// predicted-cost series (§11 "Cost-so-far-today tracking").
    pub cost_so_far_today: f64,
}

pub struct Orchestrator {
    pub config: Config,
    pub drivers: Vec<Box<dyn InverterDriver>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: Config, drivers: Vec<Box<dyn InverterDriver>>) -> Self {
        Self { config, drivers }
    }

    /// Runs one full tick: simulate the baseline, optimize, simulate the
    /// winner for telemetry, then program every inverter under the
    /// guard conditions in §4.6. Read-all-inputs has already happened by
    /// the time `inputs` is constructed; this method only simulates,
    /// optimizes, and writes.
    pub async fn tick(&self, inputs: TickInputs<'_>) -> Result<TickOutput> {
        let minutes_now = minutes_since_local_midnight(inputs.now);
        let forecast_minutes = self.config.forecast_minutes();

        let context = SimContext {
            soc_kwh: inputs.inverter.soc_kwh * self.config.battery_scaling,
            soc_max_kwh: inputs.inverter.soc_max_kwh,
            reserve_kwh: inputs.inverter.reserve_kwh,
            charge_rate_kwh_per_min: inputs.inverter.charge_rate_kwh_per_min,
            discharge_rate_kwh_per_min: inputs.inverter.discharge_rate_kwh_per_min,
            battery_loss: 1.0 - self.config.battery_loss,
            metric_house: self.config.metric_house,
            metric_battery: self.config.metric_battery,
            metric_export: self.config.metric_export,
            forecast_minutes,
            minutes_now,
            step_minutes: self.config.step_minutes,
            car_charging_hold: self.config.car_charging_hold,
            car_charging_threshold_kwh_per_min: self.config.car_charging_threshold_kwh_per_min,
        };

        let baseline_plan = inputs.inverter.as_baseline_plan();
        let baseline = simulate(
            &SimInputs::builder()
                .context(context)
                .plan(&baseline_plan)
                .load_minutes(inputs.load_minutes)
                .pv_minutes(inputs.pv_minutes)
                .rate_import(inputs.rate_import)
                .rate_export(inputs.rate_export)
                .maybe_car_charging_minutes(inputs.car_charging_minutes)
                .dispatch_slots(inputs.dispatch_slots)
                .dispatch_kwh_per_hour(self.config.car_charging_rate_kwh_per_min * 60.0)
                .build(),
        );
        info!(metric = baseline.metric.0, "Simulated the currently-configured plan");

        let params = OptimizerParams {
            best_soc_step: self.config.best_soc_step,
            best_soc_min: self.config.best_soc_min,
            best_soc_margin: self.config.best_soc_margin,
            best_soc_keep: self.config.best_soc_keep,
            metric_min_improvement: self.config.metric_min_improvement,
            pv_metric10_weight: self.config.pv_metric10_weight,
            rate_min: inputs.rate_min,
        };
        let plan = optimize(
            OptimizeInputs::builder()
                .context(context)
                .params(params)
                .charge_windows(inputs.charge_windows)
                .discharge_windows(inputs.discharge_windows)
                .load_minutes(inputs.load_minutes)
                .pv_minutes(inputs.pv_minutes)
                .pv_minutes_p10(inputs.pv_minutes_p10)
                .rate_import(inputs.rate_import)
                .rate_export(inputs.rate_export)
                .build(),
        );

        let best = simulate(
            &SimInputs::builder()
                .context(context)
                .plan(&plan)
                .load_minutes(inputs.load_minutes)
                .pv_minutes(inputs.pv_minutes)
                .rate_import(inputs.rate_import)
                .rate_export(inputs.rate_export)
                .maybe_car_charging_minutes(inputs.car_charging_minutes)
                .dispatch_slots(inputs.dispatch_slots)
                .dispatch_kwh_per_hour(self.config.car_charging_rate_kwh_per_min * 60.0)
                .build(),
        );
        let best_p10 = simulate(
            &SimInputs::builder()
                .context(context)
                .plan(&plan)
                .load_minutes(inputs.load_minutes)
                .pv_minutes(inputs.pv_minutes_p10)
                .rate_import(inputs.rate_import)
                .rate_export(inputs.rate_export)
                .maybe_car_charging_minutes(inputs.car_charging_minutes)
                .dispatch_slots(inputs.dispatch_slots)
                .dispatch_kwh_per_hour(self.config.car_charging_rate_kwh_per_min * 60.0)
                .build(),
        );
        info!(metric = best.metric.0, baseline = baseline.metric.0, "Optimized");

        self.program(&plan, &inputs.inverter, minutes_now).await;

        let status = active_status(&plan, minutes_now);
        let cost_so_far_today = SimOutput::cost_over(&best.telemetry, minutes_now);

        Ok(TickOutput {
            status,
            baseline_metric: baseline.metric.0,
            best_metric: best.metric.0,
            soc_over_time: best.telemetry.clone(),
            soc_over_time_p10: best_p10.telemetry,
            import_kwh_battery: best.import_kwh_battery,
            import_kwh_house: best.import_kwh_house,
            export_kwh: best.export_kwh,
            plan,
            cost_so_far_today,
        })
    }

    /// Emits programming actions under the guard conditions in §4.6, for
    /// every configured driver. A write is never issued unless its
    /// feature flag is enabled (§7 "Feature-flag disabled": not an
    /// error, just silence).
    async fn program(&self, plan: &Plan, inverter: &InverterState, minutes_now: Minute) {
        for driver in &self.drivers {
            if self.config.set_charge_window {
                self.program_charge_window(driver.as_ref(), plan, inverter, minutes_now).await;
            }
            if self.config.set_soc_enable {
                self.program_soc_target(driver.as_ref(), plan, inverter.soc_max_kwh, minutes_now).await;
            }
            if self.config.set_discharge_window {
                self.program_discharge_window(driver.as_ref(), plan, minutes_now).await;
            }
        }
    }

    async fn program_charge_window(
        &self,
        driver: &dyn InverterDriver,
        plan: &Plan,
        inverter: &InverterState,
        minutes_now: Minute,
    ) {
        let Some(window) = plan.charge_windows.first().copied() else { return };
        let set_window = Minute::from(self.config.set_window_minutes);
        let near_planned_start = (window.start - minutes_now).abs() <= set_window;
        let near_configured_start = inverter
            .charge_window
            .is_some_and(|(start, _)| (minute_of(start) - minutes_now).abs() <= set_window);
        if !(near_planned_start || near_configured_start) {
            return;
        }
        if window.end <= minutes_now {
            return; // planned end has already passed
        }
        if window.end - minutes_now >= 1440 {
            if let Err(error) = driver.disable_charge_window().await {
                warn!("Failed to disable the charge window: {error:#}");
            }
            return;
        }

        // If the currently running window has already started, freeze
        // its start; only the end may move.
        let start = if inverter.charge_window.is_some_and(|(start, _)| minute_of(start) <= minutes_now) {
            inverter.charge_window.map_or(minute_to_naive_time(window.start), |(start, _)| start)
        } else {
            minute_to_naive_time(window.start)
        };
        let end = minute_to_naive_time(window.end);
        if let Err(error) = driver.adjust_charge_window(start, end).await {
            warn!("Failed to program the charge window: {error:#}");
        }
    }

    async fn program_soc_target(
        &self,
        driver: &dyn InverterDriver,
        plan: &Plan,
        soc_max_kwh: f64,
        minutes_now: Minute,
    ) {
        let (Some(&window), Some(&limit)) =
            (plan.charge_windows.first(), plan.charge_limit_kwh.first())
        else {
            return;
        };
        let set_soc = Minute::from(self.config.set_soc_minutes);
        if (window.start - minutes_now).abs() > set_soc {
            return;
        }
        if let Err(error) = driver.adjust_battery_target(soc_percent(limit, soc_max_kwh)).await {
            warn!("Failed to program the target SOC: {error:#}");
        }
    }

    async fn program_discharge_window(
        &self,
        driver: &dyn InverterDriver,
        plan: &Plan,
        minutes_now: Minute,
    ) {
        let Some(index) = plan.discharge_windows.iter().position(|window| window.end > minutes_now)
        else {
            return;
        };
        let window = plan.discharge_windows[index];
        let enabled = plan.discharge_enable[index];
        let set_window = Minute::from(self.config.set_window_minutes);
        let near_start = (window.start - minutes_now).abs() <= set_window;
        let active = window.contains(minutes_now);
        if !near_start && !active {
            return; // not yet time to arm this window
        }
        let armed_and_active = enabled && active;
        let start = minute_to_naive_time(window.start);
        let end = minute_to_naive_time(window.end);
        if let Err(error) =
            driver.adjust_force_discharge(armed_and_active, Some(start), Some(end)).await
        {
            warn!("Failed to program the force-discharge window: {error:#}");
        }
    }
}

/// The percent-SOC a `limit_kwh` corresponds to, against the battery's
/// rated capacity.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn soc_percent(limit_kwh: f64, soc_max_kwh: f64) -> u8 {
    ((limit_kwh / soc_max_kwh.max(1e-9)).clamp(0.0, 1.0) * 100.0).round() as u8
}

fn minute_of(time: NaiveTime) -> Minute {
    Minute::from(time.num_seconds_from_midnight() / 60)
}

fn minute_to_naive_time(minute: Minute) -> NaiveTime {
    let normalized = minute.rem_euclid(1440);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    NaiveTime::from_hms_opt((normalized / 60) as u32, (normalized % 60) as u32, 0)
        .unwrap_or(NaiveTime::MIN)
}

fn minutes_since_local_midnight(now: DateTime<Local>) -> Minute {
    Minute::from(now.time().num_seconds_from_midnight() / 60)
}

/// The orchestrator's published status: whichever window (charge or
/// discharge) is active at `minutes_now`, charge taking priority to
/// match the simulator's own mode-selection order (§4.3 step 4).
fn active_status(plan: &Plan, minutes_now: Minute) -> Status {
    if plan.charge_windows.iter().any(|window| window.contains(minutes_now)) {
        Status::Charging
    } else if plan
        .discharge_windows
        .iter()
        .zip(&plan.discharge_enable)
        .any(|(window, &enabled)| enabled && window.contains(minutes_now))
    {
        Status::Discharging
    } else {
        Status::Idle
    }
}

impl SimOutput {
    /// Cost accumulated in the telemetry series up to and including
    /// `minutes_now`, used for the cost-so-far-today published value
    /// (§11).
    #[must_use]
    fn cost_over(telemetry: &[Snapshot], minutes_now: Minute) -> f64 {
        telemetry
            .iter()
            .take_while(|snapshot| snapshot.minute <= minutes_now)
            .last()
            .map_or(0.0, |snapshot| snapshot.cost_so_far.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rates::Window;

    fn flat_curve(value: f64, len: Minute) -> Curve {
        let mut curve = Curve::new();
        for minute in 0..len {
            curve.set(minute, value);
        }
        curve
    }

    fn idle_inverter() -> InverterState {
        InverterState {
            soc_kwh: 5.0,
            soc_max_kwh: 10.0,
            reserve_kwh: 1.0,
            charge_rate_kwh_per_min: 0.1,
            discharge_rate_kwh_per_min: 0.1,
            charge_window: None,
            current_charge_limit_pct: 0,
            scheduled_charge_enabled: false,
        }
    }

    #[test]
    fn test_active_status_idle_with_no_windows() {
        let plan = Plan::default();
        assert_eq!(active_status(&plan, 0), Status::Idle);
    }

    #[test]
    fn test_active_status_charging_inside_window() {
        let plan = Plan::all_off(vec![Window { start: 0, end: 60, average: 0.1 }], vec![], 1.0);
        assert_eq!(active_status(&plan, 30), Status::Charging);
    }

    #[test]
    fn test_aggregate_sums_capacity_across_inverters() {
        let a = idle_inverter();
        let b = idle_inverter();
        let aggregate = InverterState::aggregate(&[a, b]).unwrap();
        assert_eq!(aggregate.soc_max_kwh, 20.0);
    }

    #[tokio::test]
    async fn test_tick_zero_horizon_produces_idle_status() {
        let config = Config { forecast_hours: 0, ..Config::default() };
        let orchestrator = Orchestrator::new(config, vec![]);
        let load = flat_curve(0.0, 10);
        let pv = Curve::new();
        let rate_import = flat_curve(0.30, 10);
        let rate_export = Curve::new();
        let now = Local::now();

        let output = orchestrator
            .tick(TickInputs {
                now,
                inverter: idle_inverter(),
                load_minutes: &load,
                pv_minutes: &pv,
                pv_minutes_p10: &pv,
                rate_import: &rate_import,
                rate_export: &rate_export,
                car_charging_minutes: None,
                dispatch_slots: &[],
                charge_windows: vec![],
                discharge_windows: vec![],
                rate_min: 0.07,
            })
            .await
            .unwrap();

        assert_eq!(output.status, Status::Idle);
        assert_eq!(output.best_metric, 0.0);
    }
}
