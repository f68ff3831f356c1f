//! CLI argument tree, following the teacher's `Hunt`/`Burrow` split: a
//! main `run` command that ticks the orchestrator, and a `probe`
//! subcommand for exercising a collaborator directly.

use clap::{Parser, Subcommand};

use crate::quantity::{energy::KilowattHours, power::Kilowatts};

#[derive(Parser)]
#[command(author, version, about, long_about, propagate_version = true)]
pub struct Args {
    #[clap(flatten)]
    pub home_assistant: HomeAssistantArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Main command: simulate, optimize, and program the inverter(s).
    Run(RunArgs),

    /// Exercise a collaborator directly, without touching the inverter.
    Probe(ProbeArgs),
}

#[derive(Parser)]
pub struct HomeAssistantArgs {
    /// Base URL of the Home Assistant instance, e.g. `http://homeassistant.local:8123/`.
    #[clap(long = "home-assistant-url", env = "HOME_ASSISTANT_URL")]
    pub base_url: reqwest::Url,

    /// Long-lived access token.
    #[clap(long = "home-assistant-token", env = "HOME_ASSISTANT_TOKEN", hide_env_values = true)]
    pub token: String,
}

#[derive(Parser)]
pub struct EntityArgs {
    /// Entity providing historical total household load, in kW.
    #[clap(long = "load-entity", env = "LOAD_ENTITY_ID")]
    pub load_entity_id: String,

    /// Entity providing historical solar yield, in kWh.
    #[clap(long = "solar-entity", env = "SOLAR_ENTITY_ID")]
    pub solar_entity_id: String,

    /// Prefix shared by the inverter's `number`/`switch`/`select` entities,
    /// e.g. `number.inverter` for `number.inverter_target_soc`.
    #[clap(long = "inverter-entity-prefix", env = "INVERTER_ENTITY_PREFIX")]
    pub inverter_entity_prefix: String,
}

#[derive(Copy, Clone, Parser)]
pub struct BatteryArgs {
    /// Usable battery capacity.
    #[clap(long = "battery-capacity-kwh", default_value = "10.0", env = "BATTERY_CAPACITY_KWH")]
    pub capacity: KilowattHours,

    /// Minimum state of charge the simulator/optimizer must respect.
    #[clap(long = "battery-reserve-kwh", default_value = "1.0", env = "BATTERY_RESERVE_KWH")]
    pub reserve: KilowattHours,

    /// Maximum charging power.
    #[clap(long = "charging-power-kilowatts", default_value = "3.0", env = "CHARGING_POWER_KILOWATTS")]
    pub charging: Kilowatts,

    /// Maximum discharging power.
    #[clap(long = "discharging-power-kilowatts", default_value = "3.0", env = "DISCHARGING_POWER_KILOWATTS")]
    pub discharging: Kilowatts,
}

#[derive(Copy, Clone, Parser)]
pub struct TariffArgs {
    /// Flat import rate, currency per kWh including VAT (demo tariff fetcher).
    #[clap(long = "import-rate", default_value = "0.30", env = "IMPORT_RATE")]
    pub import_rate: f64,

    /// Flat export rate, currency per kWh including VAT (demo tariff fetcher).
    #[clap(long = "export-rate", default_value = "0.05", env = "EXPORT_RATE")]
    pub export_rate: f64,
}

#[derive(Parser)]
pub struct RunArgs {
    #[clap(flatten)]
    pub entities: EntityArgs,

    #[clap(flatten)]
    pub battery: BatteryArgs,

    #[clap(flatten)]
    pub tariff: TariffArgs,

    /// Path to a `toml` file overriding the default `Config` (§6 configuration options).
    #[clap(long = "config", env = "HEARTHSIM_CONFIG")]
    pub config_path: Option<std::path::PathBuf>,

    /// Do not program the inverter(s); only simulate, optimize, and print (dry run).
    #[clap(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Run once and exit, instead of ticking every `run_every_minutes`.
    #[clap(long)]
    pub once: bool,

    /// Dead-man's-switch URL to ping after each successful tick.
    #[clap(long = "heartbeat-url", env = "HEARTBEAT_URL")]
    pub heartbeat_url: Option<reqwest::Url>,
}

#[derive(Parser)]
pub struct ProbeArgs {
    #[clap(flatten)]
    pub entities: EntityArgs,

    #[command(subcommand)]
    pub command: ProbeCommand,
}

#[derive(Subcommand)]
pub enum ProbeCommand {
    /// Read back the inverter's entity states.
    InverterState,

    /// Fetch the demo flat tariff and print the resulting curve bounds.
    TariffRates(TariffArgs),

    /// Read the load/solar history and print the derived minute curves' lengths.
    History {
        /// How many days of history to pull.
        #[clap(long, default_value = "7")]
        days: i64,
    },
}
