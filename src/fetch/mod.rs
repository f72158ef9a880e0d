//! Paginated fetcher for the upstream dataset API.
//!
//! Pure pull: issues successive page requests ordered ascending by event
//! timestamp with a fixed page size and growing offset until a page comes
//! back empty. Each page request is independently retried under the
//! configured [`RetryPolicy`]; any other failure aborts the run.

pub mod retry;

pub use retry::{RetryPolicy, with_retry};

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use snafu::prelude::*;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{ClientBuildSnafu, FetchError, TransportSnafu};
use crate::raw::RawRecord;

/// Header carrying the optional app token for elevated rate limits.
const APP_TOKEN_HEADER: &str = "X-App-Token";

/// Format a timestamp as the upstream filter literal.
///
/// Comparisons for the event timestamp column accept literals without a
/// timezone suffix; the value is UTC at second precision.
pub fn filter_literal(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// HTTP client for one upstream dataset resource.
pub struct TripApi {
    client: reqwest::Client,
    base_url: String,
    page_limit: u64,
    app_token: Option<String>,
    retry: RetryPolicy,
}

impl TripApi {
    /// Build a client from the API configuration.
    pub fn from_config(api: &ApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .context(ClientBuildSnafu)?;

        Ok(Self {
            client,
            base_url: api.base_url.clone(),
            page_limit: api.page_limit,
            app_token: api.resolved_app_token(),
            retry: api.retry_policy(),
        })
    }

    pub fn page_limit(&self) -> u64 {
        self.page_limit
    }

    /// Fetch one page, retrying transient failures under the policy.
    ///
    /// Returns the page's records; an empty page signals exhaustion of the
    /// current window.
    pub async fn fetch_page(
        &self,
        start: DateTime<Utc>,
        offset: u64,
    ) -> Result<Vec<RawRecord>, FetchError> {
        with_retry(&self.retry, || self.request_page(start, offset)).await
    }

    /// Issue a single page request, classifying the outcome.
    async fn request_page(
        &self,
        start: DateTime<Utc>,
        offset: u64,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let predicate = format!("trip_start_timestamp >= '{}'", filter_literal(start));
        let mut request = self.client.get(&self.base_url).query(&[
            ("$limit", self.page_limit.to_string()),
            ("$offset", offset.to_string()),
            ("$where", predicate),
            ("$order", "trip_start_timestamp ASC".to_string()),
        ]);

        if let Some(token) = &self.app_token {
            request = request.header(APP_TOKEN_HEADER, token);
        }

        let response = request.send().await.context(TransportSnafu)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(FetchError::RetryableStatus { status });
        }
        if !status.is_success() {
            return Err(FetchError::FatalStatus { status });
        }

        let payload: Value = response.json().await.context(TransportSnafu)?;
        let rows = match payload {
            Value::Array(rows) => rows,
            _ => return Err(FetchError::UnexpectedPayload),
        };

        let records = rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => Ok(map),
                _ => Err(FetchError::UnexpectedPayload),
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(offset, rows = records.len(), "Fetched page");
        Ok(records)
    }
}
