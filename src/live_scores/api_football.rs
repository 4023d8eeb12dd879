use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::provider::{FetchError, SnapshotFetcher};
use crate::models::{EventStatus, LiveEvent};

/// Live data provider backed by the API-Football v3 REST API.
/// Docs: <https://www.api-football.com/documentation-v3>
pub struct ApiFootball {
    http: Client,
    api_key: String,
    /// Base URL for overriding in tests
    base_url: String,
}

impl ApiFootball {
    pub fn new(api_key: &str, base_url: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ApiFootball {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn status_from_short(s: &str) -> EventStatus {
        match s {
            "TBD" | "NS" => EventStatus::NotStarted,
            "HT" | "BT" => EventStatus::HalfTime,
            "FT" | "AET" | "PEN" | "PST" | "CANC" | "ABD" | "AWD" | "WO" => {
                EventStatus::Finished
            }
            _ => EventStatus::InProgress,
        }
    }
}

#[async_trait]
impl SnapshotFetcher for ApiFootball {
    fn name(&self) -> &str {
        "API-Football"
    }

    async fn fetch_live_events(&self) -> Result<Vec<LiveEvent>, FetchError> {
        let url = format!("{}/fixtures?live=all", self.base_url);
        debug!("Fetching live fixtures from {}", url);

        let resp = self
            .http
            .get(&url)
            .header("x-apisports-key", &self.api_key)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }

        let raw: serde_json::Value = resp.json().await?;
        parse_fixtures_response(&raw)
    }
}

/// Convert an API-Football `/fixtures` payload into live events.
///
/// Individual fixtures with missing team names or null goals are skipped;
/// a payload without a `response` array is rejected as a whole.
pub fn parse_fixtures_response(raw: &serde_json::Value) -> Result<Vec<LiveEvent>, FetchError> {
    // API-Football reports auth/quota problems with a 200 and a non-empty
    // `errors` object (or array).
    if let Some(errors) = raw.get("errors") {
        let has_errors = match errors {
            serde_json::Value::Object(m) => !m.is_empty(),
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Null => false,
            _ => true,
        };
        if has_errors {
            return Err(FetchError::Upstream(errors.to_string()));
        }
    }

    let fixtures = raw
        .get("response")
        .and_then(|r| r.as_array())
        .ok_or_else(|| FetchError::Malformed("missing `response` array".into()))?;

    let events = fixtures
        .iter()
        .filter_map(|ev| {
            let fixture = ev.get("fixture")?;
            let id = fixture.get("id")?.as_u64()?.to_string();

            let status = fixture.get("status");
            let minute = status
                .and_then(|s| s.get("elapsed"))
                .and_then(|e| e.as_u64())
                .and_then(|e| u32::try_from(e).ok());
            let short_status = status
                .and_then(|s| s.get("short"))
                .and_then(|s| s.as_str())
                .map(ApiFootball::status_from_short);

            let teams = ev.get("teams")?;
            let home_name = teams.get("home")?.get("name")?.as_str()?.to_string();
            let away_name = teams.get("away")?.get("name")?.as_str()?.to_string();

            let goals = ev.get("goals")?;
            let home_score = u32::try_from(goals.get("home")?.as_u64()?).ok()?;
            let away_score = u32::try_from(goals.get("away")?.as_u64()?).ok()?;

            Some(LiveEvent {
                id,
                home_name,
                away_name,
                home_score,
                away_score,
                status: short_status,
                minute,
            })
        })
        .collect();

    Ok(events)
}
