//! Simulates a home battery against forecast load, solar, and grid
//! tariffs; optimizes the charge/discharge schedule; and programs the
//! inverter(s) through a [`core::inverter::InverterDriver`]. Entities and
//! tariffs are read through a home-automation host via [`api::StateService`]
//! and a flat demo [`api::TariffFetcher`]; wire in a different pair of
//! implementations to target a different backend.

mod api;
mod cli;
mod core;
mod prelude;
mod quantity;
mod render;

use std::{sync::Arc, time::Duration};

use chrono::{Local, NaiveTime};
use clap::Parser;
use serde_json::Value;

use crate::{
    api::{
        StateService, TariffFetcher, heartbeat,
        state_service::HomeAssistant,
        tariff::{FlatTariff, fetch_with_retries, rates_to_curve},
    },
    cli::{Args, BatteryArgs, Command, EntityArgs, ProbeArgs, ProbeCommand, RunArgs},
    core::{
        config::Config,
        inverter::{HomeAssistantInverter, InverterDriver, NullInverter},
        orchestrator::{InverterState, Orchestrator, TickInputs},
        rates::{self, DispatchSlot},
        series,
    },
    prelude::*,
};

#[tokio::main]
async fn main() -> Result {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let state = Arc::new(HomeAssistant::try_new(
        args.home_assistant.base_url,
        args.home_assistant.token,
    )?);

    match args.command {
        Command::Run(run_args) => run(state, run_args).await?,
        Command::Probe(probe_args) => probe(state, probe_args).await?,
    }

    info!("Done!");
    Ok(())
}

async fn run(state: Arc<HomeAssistant>, run_args: RunArgs) -> Result {
    let config = load_config(run_args.config_path.as_deref())?;
    let tariff = FlatTariff {
        import_rate: run_args.tariff.import_rate,
        export_rate: run_args.tariff.export_rate,
    };
    let driver: Box<dyn InverterDriver> = if run_args.dry_run {
        Box::new(NullInverter)
    } else {
        Box::new(HomeAssistantInverter::new(
            state.clone(),
            run_args.entities.inverter_entity_prefix.clone(),
        ))
    };
    let orchestrator = Orchestrator::new(config, vec![driver]);

    loop {
        if let Err(error) =
            tick(&orchestrator, state.as_ref(), &tariff, &run_args.entities, run_args.battery).await
        {
            warn!("Tick failed, previous plan stays in effect: {error:#}");
        } else if let Some(heartbeat_url) = run_args.heartbeat_url.clone() {
            heartbeat::send(heartbeat_url).await;
        }

        if run_args.once {
            return Ok(());
        }

        let sleep = tokio::time::sleep(Duration::from_secs(
            u64::from(orchestrator.config.run_every_minutes) * 60,
        ));
        tokio::select! {
            () = sleep => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                return Ok(());
            }
        }
    }
}

/// One full read-simulate-optimize-program cycle (§4.6).
async fn tick(
    orchestrator: &Orchestrator,
    state: &HomeAssistant,
    tariff: &FlatTariff,
    entities: &EntityArgs,
    battery: BatteryArgs,
) -> Result {
    let config = orchestrator.config;
    let now = Local::now();
    let forecast_minutes = config.forecast_minutes();
    let history_days = i64::from(config.days_previous).max(forecast_minutes / 1440 + 1);

    let load_samples = state.get_history(&entities.load_entity_id, history_days).await?;
    let load_minutes = series::minute_data(series::MinuteDataArgs {
        samples: &load_samples,
        anchor: now,
        days: history_days,
        backward: true,
        has_to_key: false,
        smoothing: false,
        clean_increment: false,
        scale: 1.0,
        divide_by: 60.0,
        accumulate_onto: None,
    });

    let solar_samples = state.get_history(&entities.solar_entity_id, history_days).await?;
    let solar_minutes = series::minute_data(series::MinuteDataArgs {
        samples: &solar_samples,
        anchor: now,
        days: history_days,
        backward: true,
        has_to_key: false,
        smoothing: false,
        clean_increment: false,
        scale: 1.0,
        divide_by: 1.0,
        accumulate_onto: None,
    });
    let pv_hourly_mid = series::hourly_quantile_profile(&solar_minutes, history_days, 50.0);
    let pv_hourly_p10 = series::hourly_quantile_profile(&solar_minutes, history_days, 10.0);
    let pv_minutes = series::forecast_from_hourly(&pv_hourly_mid, forecast_minutes);
    let pv_minutes_p10 = series::forecast_from_hourly(&pv_hourly_p10, forecast_minutes);

    let import_rates =
        fetch_with_retries(|| async { tariff.get_import_rates(now).await }).await?;
    let export_rates =
        fetch_with_retries(|| async { tariff.get_export_rates(now).await }).await?;
    let rate_import =
        rates::rate_replicate(&rates_to_curve(&import_rates, now), forecast_minutes, config.metric_house);
    let rate_export =
        rates::rate_replicate(&rates_to_curve(&export_rates, now), forecast_minutes, config.metric_export);

    let (rate_min, _, import_avg, _, _) = rates::rate_minmax(&rate_import, forecast_minutes);
    let (_, _, export_avg, _, _) = rates::rate_minmax(&rate_export, forecast_minutes);

    let charge_windows = rates::scan_windows(
        &rate_import,
        forecast_minutes,
        0,
        config.min_window_len_minutes,
        import_avg * config.rate_low_threshold,
        false,
    );
    let discharge_windows = rates::scan_windows(
        &rate_export,
        forecast_minutes,
        0,
        config.min_window_len_minutes,
        export_avg * config.rate_high_threshold,
        true,
    );

    let inverter = read_inverter_state(state, &entities.inverter_entity_prefix, battery).await?;
    let dispatch_slots: Vec<DispatchSlot> = Vec::new();

    let output = orchestrator
        .tick(TickInputs {
            now,
            inverter,
            load_minutes: &load_minutes,
            pv_minutes: &pv_minutes,
            pv_minutes_p10: &pv_minutes_p10,
            rate_import: &rate_import,
            rate_export: &rate_export,
            car_charging_minutes: None,
            dispatch_slots: &dispatch_slots,
            charge_windows,
            discharge_windows,
            rate_min,
        })
        .await?;

    info!(
        status = %output.status,
        baseline = output.baseline_metric,
        best = output.best_metric,
        "Ticked",
    );
    println!("{}", render::render_windows(&output.plan));
    println!("{}", render::render_summary(&output));
    Ok(())
}

async fn probe(state: Arc<HomeAssistant>, probe_args: ProbeArgs) -> Result {
    match probe_args.command {
        ProbeCommand::InverterState => {
            let prefix = &probe_args.entities.inverter_entity_prefix;
            for suffix in ["target_soc", "charge_enable", "charge_start", "charge_end", "work_mode"] {
                let entity_id = format!("{prefix}_{suffix}");
                let value = state.get_state(&entity_id, None, Some(Value::String(String::new()))).await?;
                info!(entity_id, ?value, "Gotcha");
            }
        }
        ProbeCommand::TariffRates(tariff_args) => {
            let tariff = FlatTariff { import_rate: tariff_args.import_rate, export_rate: tariff_args.export_rate };
            let now = Local::now();
            let import_rates = tariff.get_import_rates(now).await?;
            let curve = rates_to_curve(&import_rates, now);
            let (min, max, avg, _, _) = rates::rate_minmax(&curve, 1440);
            info!(min, max, avg, "Gotcha");
        }
        ProbeCommand::History { days } => {
            let load_samples = state.get_history(&probe_args.entities.load_entity_id, days).await?;
            let solar_samples = state.get_history(&probe_args.entities.solar_entity_id, days).await?;
            info!(load_samples = load_samples.len(), solar_samples = solar_samples.len(), "Gotcha");
        }
    }
    Ok(())
}

/// Reads the aggregate inverter state from the Home Assistant entities
/// under `prefix`, falling back to the commanded battery parameters for
/// anything the entity layer doesn't expose (§3 "Inverter state").
async fn read_inverter_state(
    state: &HomeAssistant,
    prefix: &str,
    battery: BatteryArgs,
) -> Result<InverterState> {
    let soc_percent = read_f64(state, &format!("{prefix}_soc"), 0.0).await?;
    let target_soc_percent = read_f64(state, &format!("{prefix}_target_soc"), 0.0).await?;
    let charge_enabled = read_string(state, &format!("{prefix}_charge_enable"))
        .await?
        .is_some_and(|value| value == "on");
    let charge_window = match (
        read_string(state, &format!("{prefix}_charge_start")).await?,
        read_string(state, &format!("{prefix}_charge_end")).await?,
    ) {
        (Some(start), Some(end)) => parse_naive_time(&start).zip(parse_naive_time(&end)),
        _ => None,
    };

    Ok(InverterState {
        soc_kwh: battery.capacity.0 * soc_percent / 100.0,
        soc_max_kwh: battery.capacity.0,
        reserve_kwh: battery.reserve.0,
        charge_rate_kwh_per_min: battery.charging.0 / 60.0,
        discharge_rate_kwh_per_min: battery.discharging.0 / 60.0,
        charge_window,
        current_charge_limit_pct: percent_to_u8(target_soc_percent),
        scheduled_charge_enabled: charge_enabled,
    })
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn percent_to_u8(percent: f64) -> u8 {
    percent.round().clamp(0.0, 100.0) as u8
}

async fn read_string(state: &HomeAssistant, entity_id: &str) -> Result<Option<String>> {
    Ok(state
        .get_state(entity_id, None, None)
        .await?
        .and_then(|value| value.as_str().map(str::to_owned)))
}

async fn read_f64(state: &HomeAssistant, entity_id: &str, default: f64) -> Result<f64> {
    Ok(read_string(state, entity_id).await?.and_then(|text| text.parse().ok()).unwrap_or(default))
}

fn parse_naive_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S").or_else(|_| NaiveTime::parse_from_str(text, "%H:%M")).ok()
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()) };
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&body).with_context(|| format!("failed to parse config file {}", path.display()))
}
