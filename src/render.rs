//! Human-readable tick report for the CLI, grounded in the teacher's
//! `render.rs`: the same library (`comfy_table`) and the same
//! color-by-value approach (green/red/yellow keyed to rate and mode).

use comfy_table::{Cell, Color, Table, modifiers, presets};

use crate::core::{
    orchestrator::{Status, TickOutput},
    series::Minute,
};

/// Renders the chosen charge/discharge windows as a table, one row per
/// window, colored green for charge and red for enabled discharge.
#[must_use]
pub fn render_windows(plan: &crate::core::simulator::Plan) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec!["Kind", "Start", "End", "Rate", "Target"]);

    for (window, &limit) in plan.charge_windows.iter().zip(&plan.charge_limit_kwh) {
        table.add_row(vec![
            Cell::new("Charge").fg(Color::Green),
            Cell::new(format_minute(window.start)),
            Cell::new(format_minute(window.end)),
            Cell::new(format!("{:.2}", window.average)),
            Cell::new(format!("{limit:.2} kWh")),
        ]);
    }
    for (window, &enabled) in plan.discharge_windows.iter().zip(&plan.discharge_enable) {
        table.add_row(vec![
            Cell::new("Discharge").fg(if enabled { Color::Red } else { Color::Reset }),
            Cell::new(format_minute(window.start)),
            Cell::new(format_minute(window.end)),
            Cell::new(format!("{:.2}", window.average)),
            Cell::new(if enabled { "enabled" } else { "off" }),
        ]);
    }
    table
}

/// Renders a one-line summary of a completed tick: status, metrics, and
/// the predicted energy totals.
#[must_use]
pub fn render_summary(output: &TickOutput) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec!["Status", "Baseline", "Best", "Import (house)", "Import (battery)", "Export"]);
    table.add_row(vec![
        Cell::new(output.status.to_string()).fg(match output.status {
            Status::Charging => Color::Green,
            Status::Discharging => Color::Red,
            Status::Idle => Color::Reset,
        }),
        Cell::new(format!("{:+.2}", output.baseline_metric)),
        Cell::new(format!("{:+.2}", output.best_metric)).fg(
            if output.best_metric <= output.baseline_metric { Color::Green } else { Color::Red },
        ),
        Cell::new(format!("{:.3} kWh", output.import_kwh_house)),
        Cell::new(format!("{:.3} kWh", output.import_kwh_battery)),
        Cell::new(format!("{:.3} kWh", output.export_kwh)),
    ]);
    table
}

/// Formats a minute-of-day offset (possibly beyond 1440 for a window
/// that crosses local midnight) as `HH:MM`, wrapping the day component.
fn format_minute(minute: Minute) -> String {
    let normalized = minute.rem_euclid(1440);
    format!("{:02}:{:02}", normalized / 60, normalized % 60)
}
