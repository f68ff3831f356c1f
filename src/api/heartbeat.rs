use reqwest::Url;

use crate::prelude::*;

/// Pings a dead-man's-switch URL (e.g. Healthchecks.io) after a
/// successful tick; failures are logged, never propagated — a missed
/// heartbeat should page the operator, not crash the run.
#[instrument(skip_all, name = "Sending a heartbeat…")]
pub async fn send(url: Url) {
    if let Err(error) = reqwest::Client::new().post(url).send().await {
        warn!("Failed to send the heartbeat: {error:#}");
    }
}
