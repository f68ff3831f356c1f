//! StateService: the collaborator contract for reading and writing
//! entity state against a home-automation host (§6 "State service").
//! The core only ever sees this trait — acquisition of credentials,
//! HTTP retries beyond what's specified, and entity naming conventions
//! are the host adapter's problem, not the core's.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::Value;

use crate::{core::series::RawSample, prelude::*};

/// `get_state`/`set_state`/`get_history` (§6). Unknown values are
/// treated as missing by every caller, not as an error.
#[async_trait]
pub trait StateService: Send + Sync {
    /// Reads an entity's current state, or an optional attribute of it.
    /// Returns `default` (not an error) when the entity or attribute is
    /// absent, matching the "Index-out-of-range" taxonomy entry in §7.
    async fn get_state(
        &self,
        entity_id: &str,
        attribute: Option<&str>,
        default: Option<Value>,
    ) -> Result<Option<Value>>;

    /// Writes an entity's state and attributes.
    async fn set_state(&self, entity_id: &str, state: &str, attributes: Value) -> Result<()>;

    /// Fetches up to `days` of history samples for an entity, oldest
    /// first, ready for [`crate::core::series::minute_data`].
    async fn get_history(&self, entity_id: &str, days: i64) -> Result<Vec<RawSample>>;
}

/// A demo Home-Assistant-backed implementation, grounded in the
/// teacher's `home_assistant::Api` client: a bearer-token `reqwest`
/// client against the REST API's `/api/states` and `/api/history`
/// endpoints.
pub struct HomeAssistant {
    client: reqwest::Client,
    base_url: reqwest::Url,
    token: String,
}

impl HomeAssistant {
    pub fn try_new(base_url: reqwest::Url, token: impl Into<String>) -> Result<Self> {
        Ok(Self { client: super::client::try_new()?, base_url, token: token.into() })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

#[async_trait]
impl StateService for HomeAssistant {
    #[instrument(skip_all, fields(entity_id))]
    async fn get_state(
        &self,
        entity_id: &str,
        attribute: Option<&str>,
        default: Option<Value>,
    ) -> Result<Option<Value>> {
        let url = self.base_url.join(&format!("api/states/{entity_id}"))?;
        let response = self.authorized(self.client.get(url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            warn!(entity_id, "entity not found, using default");
            return Ok(default);
        }
        let body: Value = response.error_for_status()?.json().await?;
        let value = match attribute {
            Some(name) => body.get("attributes").and_then(|attrs| attrs.get(name)),
            None => body.get("state"),
        };
        Ok(value.cloned().or(default))
    }

    #[instrument(skip_all, fields(entity_id))]
    async fn set_state(&self, entity_id: &str, state: &str, attributes: Value) -> Result<()> {
        let url = self.base_url.join(&format!("api/states/{entity_id}"))?;
        self.authorized(self.client.post(url))
            .json(&serde_json::json!({ "state": state, "attributes": attributes }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    #[instrument(skip_all, fields(entity_id, days))]
    async fn get_history(&self, entity_id: &str, days: i64) -> Result<Vec<RawSample>> {
        let now = Local::now();
        let from = now - chrono::TimeDelta::days(days);
        let mut url = self.base_url.join(&format!("api/history/period/{}", from.to_rfc3339()))?;
        url.query_pairs_mut()
            .append_pair("filter_entity_id", entity_id)
            .append_pair("end_time", &now.to_rfc3339());
        let body: Vec<Vec<HistoryState>> =
            self.authorized(self.client.get(url)).send().await?.error_for_status()?.json().await?;
        let samples = body
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|state| RawSample {
                state: state.state,
                timestamp: state.last_changed,
                end_timestamp: None,
            })
            .collect();
        Ok(samples)
    }
}

#[derive(serde::Deserialize)]
struct HistoryState {
    state: Option<String>,
    #[serde(rename = "last_changed")]
    last_changed: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_state_missing_is_none() {
        let json = r#"{"state": "unavailable", "last_changed": "2025-01-01T00:00:00+00:00"}"#;
        let state: HistoryState = serde_json::from_str(json).unwrap();
        assert_eq!(state.state.as_deref(), Some("unavailable"));
    }
}
