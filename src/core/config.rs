//! A typed configuration struct, built once per tick, replacing the
//! source's dynamic string-keyed lookups into a heterogeneous map (§9,
//! "Dynamic per-key lookups").

use serde::Deserialize;

/// Simulation and optimizer parameters (§6 "Configuration options").
/// Deserializable from a `toml` body; individual fields may be
/// overridden from CLI flags/env vars by the caller before use.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub forecast_hours: u32,
    pub days_previous: u32,
    pub battery_loss: f64,
    pub battery_scaling: f64,
    pub metric_house: f64,
    pub metric_battery: f64,
    pub metric_export: f64,
    pub rate_low_threshold: f64,
    pub rate_high_threshold: f64,
    pub best_soc_min: f64,
    pub best_soc_margin: f64,
    pub best_soc_keep: f64,
    pub best_soc_step: f64,
    pub metric_min_improvement: f64,
    pub pv_metric10_weight: f64,
    pub set_soc_enable: bool,
    pub set_charge_window: bool,
    pub set_discharge_window: bool,
    pub set_soc_minutes: u32,
    pub set_window_minutes: u32,
    pub car_charging_hold: bool,
    pub car_charging_threshold_kwh_per_min: f64,
    pub car_charging_rate_kwh_per_min: f64,
    pub run_every_minutes: u32,
    pub step_minutes: i64,
    pub min_window_len_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forecast_hours: 24,
            days_previous: 7,
            battery_loss: 0.05,
            battery_scaling: 1.0,
            metric_house: 0.30,
            metric_battery: 0.30,
            metric_export: 0.05,
            rate_low_threshold: 0.8,
            rate_high_threshold: 1.2,
            best_soc_min: 0.0,
            best_soc_margin: 0.0,
            best_soc_keep: 0.0,
            best_soc_step: 0.5,
            metric_min_improvement: 0.0,
            pv_metric10_weight: 0.5,
            set_soc_enable: true,
            set_charge_window: true,
            set_discharge_window: false,
            set_soc_minutes: 30,
            set_window_minutes: 30,
            car_charging_hold: false,
            car_charging_threshold_kwh_per_min: 6.0 / 60.0,
            car_charging_rate_kwh_per_min: 7.0 / 60.0,
            run_every_minutes: 5,
            step_minutes: 5,
            min_window_len_minutes: 5,
        }
    }
}

impl Config {
    #[must_use]
    pub fn forecast_minutes(&self) -> i64 {
        i64::from(self.forecast_hours) * 60
    }
}

/// A template-like reference used where the source resolved values
/// dynamically: either a literal number, or a reference into state-
/// service-provided data that the caller must resolve before building a
/// [`Config`] (§9, "template resolution becomes a small interpreter").
#[derive(Clone, Debug)]
pub enum ConfigRef {
    Scalar(f64),
    StateRef(String),
    TemplateRef(String),
}

impl ConfigRef {
    /// Resolves against an explicit resolver function; unknown
    /// `StateRef`/`TemplateRef` values fall back to `default` per the
    /// "Index-out-of-range" taxonomy entry in §7 (warn, return null,
    /// caller falls back to default).
    pub fn resolve(&self, resolver: impl Fn(&str) -> Option<f64>, default: f64) -> f64 {
        match self {
            Self::Scalar(value) => *value,
            Self::StateRef(entity) | Self::TemplateRef(entity) => {
                resolver(entity).unwrap_or_else(|| {
                    tracing::warn!(entity, "Could not resolve config reference, using default");
                    default
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_forecast_minutes() {
        assert_eq!(Config::default().forecast_minutes(), 1440);
    }

    #[test]
    fn test_config_ref_falls_back_to_default_when_unresolved() {
        let config_ref = ConfigRef::StateRef("sensor.missing".to_string());
        let resolved = config_ref.resolve(|_| None, 42.0);
        assert_eq!(resolved, 42.0);
    }
}
