//! TariffFetcher: the collaborator contract for import/export tariff
//! acquisition (§6 "Tariff fetcher"). HTTP fetches and JSON decoding are
//! explicitly out of scope for the core (§1); this module only defines
//! the normalized shape the core consumes and the retry policy that
//! turns a flaky fetch into the "previous plan stays in effect" policy
//! the orchestrator enforces (§7 "Tariff-fetch-failed", §9
//! "Exception-as-signal in tariff fetch").

use std::future::Future;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta};

use crate::{
    core::series::{Curve, Minute},
    prelude::*,
};

/// Up to three retries before the tick surfaces a failure (§7).
pub const MAX_RETRIES: u32 = 3;

/// One tariff rate, valid across `[valid_from, valid_to)`, in the
/// currency's minor-unit-free decimal form including VAT (§6).
#[derive(Clone, Copy, Debug)]
pub struct TariffRate {
    pub valid_from: DateTime<Local>,
    pub valid_to: DateTime<Local>,
    pub value_inc_vat: f64,
}

/// A tariff fetcher, returning rates across however many pages the
/// upstream API paginates over; implementations hide pagination from
/// the core entirely.
#[async_trait]
pub trait TariffFetcher: Send + Sync {
    async fn get_import_rates(&self, from: DateTime<Local>) -> Result<Vec<TariffRate>>;
    async fn get_export_rates(&self, from: DateTime<Local>) -> Result<Vec<TariffRate>>;
}

/// Retries `fetch` up to [`MAX_RETRIES`] times; the first success wins,
/// the last failure propagates (§7: "after that, the tick fails with a
/// surfaced error and the previous plan stays in effect" — the caller
/// is expected to keep the previous plan on `Err`).
pub async fn fetch_with_retries<T, F, Fut>(mut fetch: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;
    for attempt in 0..=MAX_RETRIES {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                warn!(attempt, "tariff fetch failed: {error:#}");
                last_error = Some(error);
            }
        }
    }
    Err(last_error.expect("loop runs at least once"))
}

/// Converts fetched tariff rate slots into a forward minute curve
/// anchored at `now`, filling every minute each slot covers; gaps are
/// left for the caller to fill via [`crate::core::rates::rate_replicate`].
#[must_use]
pub fn rates_to_curve(rates: &[TariffRate], now: DateTime<Local>) -> Curve {
    let mut curve = Curve::new();
    for rate in rates {
        let start: Minute = (rate.valid_from - now).num_minutes();
        let end: Minute = (rate.valid_to - now).num_minutes();
        for minute in start.max(0)..end {
            curve.set(minute, rate.value_inc_vat);
        }
    }
    curve
}

/// A demo fetcher for a flat, single-rate import/export tariff, letting
/// the CLI run end-to-end without a real tariff-provider collaborator.
pub struct FlatTariff {
    pub import_rate: f64,
    pub export_rate: f64,
}

#[async_trait]
impl TariffFetcher for FlatTariff {
    async fn get_import_rates(&self, from: DateTime<Local>) -> Result<Vec<TariffRate>> {
        Ok(flat_rates(from, self.import_rate))
    }

    async fn get_export_rates(&self, from: DateTime<Local>) -> Result<Vec<TariffRate>> {
        Ok(flat_rates(from, self.export_rate))
    }
}

/// 96 half-hour slots (2 days) at a constant rate.
fn flat_rates(from: DateTime<Local>, value_inc_vat: f64) -> Vec<TariffRate> {
    (0..96)
        .map(|slot| {
            let valid_from = from + TimeDelta::minutes(slot * 30);
            let valid_to = valid_from + TimeDelta::minutes(30);
            TariffRate { valid_from, valid_to, value_inc_vat }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_fetch_with_retries_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = fetch_with_retries(|| async {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            if count < 2 { bail!("transient") } else { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_fetch_with_retries_gives_up_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = fetch_with_retries(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            bail!("always fails")
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[test]
    fn test_rates_to_curve_fills_slot_minutes() {
        let now = Local::now();
        let rates = vec![TariffRate {
            valid_from: now + TimeDelta::minutes(30),
            valid_to: now + TimeDelta::minutes(60),
            value_inc_vat: 0.07,
        }];
        let curve = rates_to_curve(&rates, now);
        assert_eq!(curve.get(45), 0.07);
        assert_eq!(curve.get(10), 0.0);
    }

    #[tokio::test]
    async fn test_flat_tariff_covers_two_days_at_constant_rate() {
        let tariff = FlatTariff { import_rate: 0.30, export_rate: 0.05 };
        let now = Local::now();
        let rates = tariff.get_import_rates(now).await.unwrap();
        assert_eq!(rates.len(), 96);
        assert!(rates.iter().all(|rate| rate.value_inc_vat == 0.30));
        assert_eq!(rates.first().unwrap().valid_from, now);
    }
}
