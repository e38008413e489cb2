use std::time::Duration;

use chrono::{DateTime, Utc};

use super::response::QueryResponse;
use crate::datasource::Datasource;

/// Query API endpoint fetched from a datasource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Metadata,
    Query,
    QueryRange,
    Targets,
    Healthy,
}

impl Action {
    pub fn path(&self) -> &'static str {
        match self {
            Action::Metadata => "/api/v1/metadata",
            Action::Query => "/api/v1/query",
            Action::QueryRange => "/api/v1/query_range",
            Action::Targets => "/api/v1/targets",
            Action::Healthy => "/-/healthy",
        }
    }
}

/// A datasource reply, whatever its status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Timeout-bounded HTTP client for datasource query APIs.
///
/// Non-2xx responses are returned as `(status, body)`, not as errors; only
/// transport failures are errors. Dropping a pending future aborts the
/// request.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch `action` from `datasource` with `raw_query` as the query string
    pub async fn get(
        &self,
        datasource: &Datasource,
        action: Action,
        raw_query: &str,
    ) -> Result<(u16, String), RemoteError> {
        let response = self.fetch(datasource, action, raw_query).await?;
        Ok((response.status, response.body))
    }

    /// Like `get`, keeping the backend's `Content-Type` for relaying
    pub async fn fetch(
        &self,
        datasource: &Datasource,
        action: Action,
        raw_query: &str,
    ) -> Result<RemoteResponse, RemoteError> {
        let url = Self::build_url(datasource, action, raw_query)?;

        let mut request = self.http_client.get(url).timeout(self.timeout);
        if let Some(auth) = &datasource.basic_auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        tracing::trace!(
            datasource = %datasource.name,
            path = action.path(),
            status,
            "Remote query finished"
        );

        Ok(RemoteResponse {
            status,
            content_type,
            body,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else {
            RemoteError::Network(e.to_string())
        }
    }

    /// Run an instant query and decode the response envelope.
    ///
    /// An envelope is decoded from any status code, so a `bad_data` reply
    /// comes back as `Ok` with `status: error`.
    pub async fn query_instant(
        &self,
        datasource: &Datasource,
        expr: &str,
        time: DateTime<Utc>,
    ) -> Result<QueryResponse, RemoteError> {
        let raw_query = instant_query(expr, time)?;
        let (status, body) = self.get(datasource, Action::Query, &raw_query).await?;

        serde_json::from_str(&body).map_err(|e| RemoteError::Decode {
            status,
            reason: e.to_string(),
        })
    }

    /// `true` when the datasource health endpoint answers 2xx
    pub async fn health_check(&self, datasource: &Datasource) -> Result<bool, RemoteError> {
        let (status, _) = self.get(datasource, Action::Healthy, "").await?;
        Ok((200..300).contains(&status))
    }

    fn build_url(
        datasource: &Datasource,
        action: Action,
        raw_query: &str,
    ) -> Result<reqwest::Url, RemoteError> {
        let base = datasource.url.trim_end_matches('/');
        let mut url = reqwest::Url::parse(&format!("{}{}", base, action.path()))
            .map_err(|e| RemoteError::InvalidUrl(format!("{}: {}", datasource.url, e)))?;

        let raw_query = raw_query.trim_start_matches('?');
        if !raw_query.is_empty() {
            url.set_query(Some(raw_query));
        }
        Ok(url)
    }
}

/// Query string for an instant query: `query`, `time`
pub fn instant_query(expr: &str, time: DateTime<Utc>) -> Result<String, RemoteError> {
    encode_query(&[("query", expr), ("time", &unix_seconds(time))])
}

/// Query string for a range query: `query`, `start`, `end`, `step`
pub fn range_query(
    expr: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step: Duration,
) -> Result<String, RemoteError> {
    encode_query(&[
        ("query", expr),
        ("start", &unix_seconds(start)),
        ("end", &unix_seconds(end)),
        ("step", &format!("{}", step.as_secs_f64())),
    ])
}

/// Query string for the active targets listing
pub fn targets_query() -> String {
    "state=active".to_string()
}

fn unix_seconds(time: DateTime<Utc>) -> String {
    format!("{:.3}", time.timestamp_millis() as f64 / 1000.0)
}

fn encode_query(pairs: &[(&str, &str)]) -> Result<String, RemoteError> {
    let url = reqwest::Url::parse_with_params("http://localhost/", pairs)
        .map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
    Ok(url.query().unwrap_or_default().to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Invalid datasource url: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to decode response (status {status}): {reason}")]
    Decode { status: u16, reason: String },
}
