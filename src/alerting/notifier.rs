//! Alertmanager delivery

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::rule::Alert;

/// Wire shape of one alert in an Alertmanager `POST /api/v1/alerts` batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableAlert<'a> {
    pub status: &'static str,
    pub labels: &'a BTreeMap<String, String>,
    pub annotations: &'a BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(rename = "generatorURL", skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
}

/// Posts batches of firing alerts to an Alertmanager
#[derive(Debug, Clone)]
pub struct Notifier {
    client: reqwest::Client,
    alertmanager_url: Option<String>,
    generator_url: Option<String>,
}

impl Notifier {
    /// `alertmanager_url` of `None` logs batches instead of sending them
    pub fn new(alertmanager_url: Option<String>, timeout: Duration) -> Result<Self, NotifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifierError::Client(e.to_string()))?;

        Ok(Self {
            client,
            alertmanager_url: alertmanager_url.map(|u| u.trim_end_matches('/').to_string()),
            generator_url: None,
        })
    }

    /// Base URL advertised as `generatorURL`
    pub fn with_generator_url(mut self, url: Option<String>) -> Self {
        self.generator_url = url;
        self
    }

    pub fn alertmanager_url(&self) -> Option<&str> {
        self.alertmanager_url.as_deref()
    }

    /// Send one batch. An empty batch is a no-op.
    pub async fn send(&self, alerts: &[Alert]) -> Result<(), NotifierError> {
        if alerts.is_empty() {
            return Ok(());
        }

        let Some(base) = &self.alertmanager_url else {
            for alert in alerts {
                tracing::warn!(
                    alertname = alert.labels.get("alertname").map(String::as_str).unwrap_or(""),
                    labels = ?alert.labels,
                    "Alert firing (no alertmanager configured)"
                );
            }
            return Ok(());
        };

        let payload: Vec<PostableAlert<'_>> = alerts
            .iter()
            .map(|alert| PostableAlert {
                status: "firing",
                labels: &alert.labels,
                annotations: &alert.annotations,
                starts_at: alert.fired_at.unwrap_or(alert.created_at),
                generator_url: self.generator_url.clone(),
            })
            .collect();

        let url = format!("{}/api/v1/alerts", base);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifierError::Delivery(format!("Failed to post alerts: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifierError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::debug!(url = %url, alerts = alerts.len(), "Alerts sent to alertmanager");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Alertmanager returned status {status}: {body}")]
    Rejected { status: u16, body: String },
}
