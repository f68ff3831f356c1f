//! InverterDriver: the idempotent programming contract the orchestrator
//! drives (§4.5), plus a demo implementation that programs a battery
//! through Home-Assistant-style number/switch entities over the
//! [`StateService`] contract, grounded in the teacher's `home_assistant`
//! client and `write_and_poll`-style retry against a downstream protocol
//! known to drop writes.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveTime;
use serde_json::json;

use crate::{api::state_service::StateService, prelude::*};

/// Minimum poll count and interval the write-and-poll loop must honour
/// (§4.5: "≥ 12 polls at ≥ 5-second interval").
pub const MIN_POLL_COUNT: u32 = 12;
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// A capability the orchestrator uses to program one inverter. Any
/// implementation must honour idempotence: re-issuing the same command
/// twice in a row performs zero writes on the second call (§8 S6).
#[async_trait]
pub trait InverterDriver: Send + Sync {
    /// Idempotent; writes only on change.
    async fn adjust_battery_target(&self, percent: u8) -> Result<()>;

    /// Enables the schedule if disabled, then writes start/end using
    /// write-and-poll against a last-read value.
    async fn adjust_charge_window(&self, start: NaiveTime, end: NaiveTime) -> Result<()>;

    /// Idempotent.
    async fn disable_charge_window(&self) -> Result<()>;

    /// Switches the inverter between eco and timed-export mode; writes
    /// times only if provided and changed.
    async fn adjust_force_discharge(
        &self,
        enable: bool,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<()>;
}

/// Reads a value, and if it differs from `desired`, writes it and polls
/// until the read-back matches or the poll budget is exhausted (§4.5,
/// §5: "known to drop writes"). Returns `Ok(true)` if a write occurred.
///
/// `read` and `write` are async closures; `poll_count` and `poll_interval`
/// must be at least [`MIN_POLL_COUNT`]/[`MIN_POLL_INTERVAL`] to satisfy
/// the contract, though callers may pass a larger budget.
pub async fn write_and_poll<T, R, W>(
    desired: T,
    mut read: R,
    mut write: W,
    poll_count: u32,
    poll_interval: Duration,
) -> Result<bool>
where
    T: PartialEq + Clone,
    R: AsyncFnMut() -> Result<T>,
    W: AsyncFnMut(T) -> Result<()>,
{
    let current = read().await?;
    if current == desired {
        return Ok(false); // idempotent: no write needed
    }

    write(desired.clone()).await?;

    for attempt in 0..poll_count.max(MIN_POLL_COUNT) {
        tokio::time::sleep(poll_interval.max(MIN_POLL_INTERVAL)).await;
        let observed = read().await?;
        if observed == desired {
            return Ok(true);
        }
        warn!(attempt, "Inverter write not yet acknowledged, retrying");
    }

    warn!("Inverter write not acknowledged after poll budget exhausted");
    Ok(true)
}

/// A demo driver that programs a battery through Home-Assistant-style
/// `number`/`switch`/`select` entities, reached via a [`StateService`].
/// Every write goes through [`write_and_poll`] against the
/// corresponding read-back entity, because the downstream inverter
/// integration (a cloud-bridged Modbus link, typically) is known to
/// silently drop the occasional write (§4.5, §5 "Shared resources").
pub struct HomeAssistantInverter {
    state: Arc<dyn StateService>,
    entity_prefix: String,
}

impl HomeAssistantInverter {
    #[must_use]
    pub fn new(state: Arc<dyn StateService>, entity_prefix: impl Into<String>) -> Self {
        Self { state, entity_prefix: entity_prefix.into() }
    }

    fn entity(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.entity_prefix)
    }

    async fn read_state(&self, entity_id: &str) -> Result<String> {
        Ok(self
            .state
            .get_state(entity_id, None, Some(json!("")))
            .await?
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_default())
    }
}

#[async_trait]
impl InverterDriver for HomeAssistantInverter {
    #[instrument(skip(self))]
    async fn adjust_battery_target(&self, percent: u8) -> Result<()> {
        let entity = self.entity("target_soc");
        let desired = percent.to_string();
        write_and_poll(
            desired,
            async || self.read_state(&entity).await,
            async |value: String| self.state.set_state(&entity, &value, json!({})).await,
            MIN_POLL_COUNT,
            MIN_POLL_INTERVAL,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn adjust_charge_window(&self, start: NaiveTime, end: NaiveTime) -> Result<()> {
        let enable_entity = self.entity("charge_enable");
        if self.read_state(&enable_entity).await? != "on" {
            self.state.set_state(&enable_entity, "on", json!({})).await?;
        }

        let start_entity = self.entity("charge_start");
        let end_entity = self.entity("charge_end");
        let desired = format!("{start}-{end}");
        write_and_poll(
            desired,
            async || {
                let start = self.read_state(&start_entity).await?;
                let end = self.read_state(&end_entity).await?;
                Ok(format!("{start}-{end}"))
            },
            async |_: String| {
                self.state.set_state(&start_entity, &start.to_string(), json!({})).await?;
                self.state.set_state(&end_entity, &end.to_string(), json!({})).await
            },
            MIN_POLL_COUNT,
            MIN_POLL_INTERVAL,
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn disable_charge_window(&self) -> Result<()> {
        let entity = self.entity("charge_enable");
        if self.read_state(&entity).await? != "off" {
            self.state.set_state(&entity, "off", json!({})).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn adjust_force_discharge(
        &self,
        enable: bool,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<()> {
        let mode_entity = self.entity("work_mode");
        let desired_mode = if enable { "timed_export" } else { "eco" };
        if self.read_state(&mode_entity).await? != desired_mode {
            self.state.set_state(&mode_entity, desired_mode, json!({})).await?;
        }

        if let (Some(start), Some(end)) = (start, end) {
            let start_entity = self.entity("discharge_start");
            let end_entity = self.entity("discharge_end");
            if self.read_state(&start_entity).await? != start.to_string() {
                self.state.set_state(&start_entity, &start.to_string(), json!({})).await?;
            }
            if self.read_state(&end_entity).await? != end.to_string() {
                self.state.set_state(&end_entity, &end.to_string(), json!({})).await?;
            }
        }
        Ok(())
    }
}

/// A no-op driver for dry runs (teacher's `--stalk` flag): logs what it
/// would have written instead of writing it.
pub struct NullInverter;

#[async_trait]
impl InverterDriver for NullInverter {
    async fn adjust_battery_target(&self, percent: u8) -> Result<()> {
        info!(percent, "dry run: would adjust battery target");
        Ok(())
    }

    async fn adjust_charge_window(&self, start: NaiveTime, end: NaiveTime) -> Result<()> {
        info!(%start, %end, "dry run: would adjust charge window");
        Ok(())
    }

    async fn disable_charge_window(&self) -> Result<()> {
        info!("dry run: would disable the charge window");
        Ok(())
    }

    async fn adjust_force_discharge(
        &self,
        enable: bool,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
    ) -> Result<()> {
        info!(enable, ?start, ?end, "dry run: would adjust force discharge");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU8, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_write_and_poll_is_idempotent_when_already_set() {
        let current = AtomicU8::new(50);
        let writes = AtomicU8::new(0);

        let wrote = write_and_poll(
            50u8,
            async || Ok(current.load(Ordering::SeqCst)),
            async |value: u8| {
                writes.fetch_add(1, Ordering::SeqCst);
                current.store(value, Ordering::SeqCst);
                Ok(())
            },
            MIN_POLL_COUNT,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        assert!(!wrote);
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_write_and_poll_writes_on_change() {
        let current = AtomicU8::new(50);
        let writes = AtomicU8::new(0);

        let wrote = write_and_poll(
            80u8,
            async || Ok(current.load(Ordering::SeqCst)),
            async |value: u8| {
                writes.fetch_add(1, Ordering::SeqCst);
                current.store(value, Ordering::SeqCst);
                Ok(())
            },
            MIN_POLL_COUNT,
            Duration::from_millis(1),
        )
        .await
        .unwrap();

        assert!(wrote);
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        assert_eq!(current.load(Ordering::SeqCst), 80);
    }
}
