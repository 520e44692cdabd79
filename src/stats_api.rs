//! Client for the remote stats collection API.
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::StatsApiConfig;
use crate::error::StatsError;
use crate::models::{StatsDataObject, StatsType};

const STATS_PATH: &str = "api/v1/stats/";
const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResultSet {
    pub count: u64,
    pub offset: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsMetadata {
    pub resultset: ResultSet,
}

/// Stats already stored on the remote side. Entries are kept as raw JSON
/// because the API returns them in several shapes depending on the query.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    pub metadata: StatsMetadata,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct StatsQuery {
    pub stats_type: StatsType,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl StatsQuery {
    pub fn for_day(stats_type: StatsType, date: NaiveDate) -> Self {
        Self {
            stats_type,
            date_from: date,
            date_to: date,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitAck {
    status: String,
}

#[derive(Debug, Clone)]
pub struct StatsApiClient {
    client: Client,
    stats_url: Url,
    api_key: Option<String>,
}

impl StatsApiClient {
    /// # Errors
    /// Fails when the base URL does not parse or the HTTP client cannot be built.
    pub fn new(config: &StatsApiConfig) -> Result<Self, StatsError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()?;

        // A base without a trailing slash would lose its last segment on join.
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let stats_url = Url::parse(&base)?.join(STATS_PATH)?;

        Ok(Self {
            client,
            stats_url,
            api_key: config.api_key.clone(),
        })
    }

    pub async fn get_stats(&self, query: &StatsQuery) -> Result<StatsResponse, StatsError> {
        let mut url = self.stats_url.clone();
        url.query_pairs_mut()
            .append_pair("type", query.stats_type.as_str())
            .append_pair("date_from", &query.date_from.format("%Y-%m-%d").to_string())
            .append_pair("date_to", &query.date_to.format("%Y-%m-%d").to_string());

        debug!(url = %url, "fetching stats");
        let response = self.with_api_key(self.client.get(url)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StatsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let stats = response.json::<StatsResponse>().await?;
        debug!(
            count = stats.metadata.resultset.count,
            offset = stats.metadata.resultset.offset,
            limit = stats.metadata.resultset.limit,
            entries = stats.data.len(),
            "fetched stats"
        );
        Ok(stats)
    }

    /// Posts the whole batch as one JSON array.
    pub async fn send_stats(&self, stats: &[StatsDataObject]) -> Result<(), StatsError> {
        debug!(entries = stats.len(), url = %self.stats_url, "sending stats");
        let response = self
            .with_api_key(self.client.post(self.stats_url.clone()))
            .json(stats)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StatsError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let ack = response.json::<SubmitAck>().await?;
        if ack.status != "ok" {
            return Err(StatsError::UnexpectedAck(ack.status));
        }

        Ok(())
    }

    fn with_api_key(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }
}
