//! Per-datasource alerting rule state machine

use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::Rule;
use super::template::render_or_raw;
use crate::datasource::{Datasource, DatasourceSelector};
use crate::remote::{QueryData, ResultType};

/// Label naming the rule that produced an alert
pub const ALERTNAME_LABEL: &str = "alertname";
/// Label identifying this gateway as the alert source
pub const FIRER_LABEL: &str = "firer";
pub const FIRER_NAME: &str = "venti";

/// Alert lifecycle state, ordered by severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Inactive,
    Pending,
    Firing,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Inactive => "inactive",
            AlertState::Pending => "pending",
            AlertState::Firing => "firing",
        }
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an alert within a rule: hash of the series label set
pub type Fingerprint = u64;

/// Stable, order-independent hash of a label set
pub fn fingerprint(labels: &BTreeMap<String, String>) -> Fingerprint {
    // BTreeMap iterates in key order, so insertion order never matters
    let mut hasher = fxhash::FxHasher64::default();
    for (name, value) in labels {
        name.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

/// One tracked series of a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub state: AlertState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on the transition to firing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Last sample value as returned by the datasource
    pub value: String,
}

/// A series extracted from a query result
#[derive(Debug, Clone)]
struct Series {
    metric: BTreeMap<String, String>,
    value: String,
}

/// A rule bound to one datasource, with its active alerts
#[derive(Debug, Clone)]
pub struct AlertingRule {
    pub datasource_selector: DatasourceSelector,
    pub common_labels: BTreeMap<String, String>,
    pub rule: Rule,
    pub datasource: Datasource,
    active: HashMap<Fingerprint, Alert>,
    last_evaluation: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl AlertingRule {
    pub fn new(
        datasource_selector: DatasourceSelector,
        common_labels: BTreeMap<String, String>,
        rule: Rule,
        datasource: Datasource,
    ) -> Self {
        Self {
            datasource_selector,
            common_labels,
            rule,
            datasource,
            active: HashMap::new(),
            last_evaluation: None,
            last_error: None,
        }
    }

    pub fn name(&self) -> &str {
        self.rule.alert.as_deref().unwrap_or_default()
    }

    pub fn active(&self) -> &HashMap<Fingerprint, Alert> {
        &self.active
    }

    /// Most severe state among active alerts, `Inactive` when there are none
    pub fn state(&self) -> AlertState {
        self.active
            .values()
            .map(|a| a.state)
            .max()
            .unwrap_or(AlertState::Inactive)
    }

    pub fn firing_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.active.values().filter(|a| a.state == AlertState::Firing)
    }

    pub fn last_evaluation(&self) -> Option<DateTime<Utc>> {
        self.last_evaluation
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a failed evaluation. Active alerts are left untouched.
    pub fn record_error(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.last_evaluation = Some(now);
        self.last_error = Some(error.into());
    }

    /// Advance the state machine with a successful query result.
    ///
    /// Fails, leaving state untouched, only when a vector result cannot be
    /// decoded.
    pub fn apply(&mut self, data: &QueryData, now: DateTime<Utc>) -> Result<(), serde_json::Error> {
        let series = Self::extract_series(data)?;

        let mut seen = HashSet::with_capacity(series.len());
        for s in &series {
            let fp = fingerprint(&s.metric);
            seen.insert(fp);
            self.observe(fp, s, now);
        }

        let before = self.active.len();
        self.active.retain(|fp, _| seen.contains(fp));
        let resolved = before - self.active.len();
        if resolved > 0 {
            tracing::debug!(rule = %self.name(), datasource = %self.datasource.name, resolved, "Alerts resolved");
        }

        self.last_evaluation = Some(now);
        self.last_error = None;
        Ok(())
    }

    fn extract_series(data: &QueryData) -> Result<Vec<Series>, serde_json::Error> {
        if data.result_type == ResultType::Vector {
            return Ok(data
                .vector()?
                .into_iter()
                .map(|sample| Series {
                    metric: sample.metric,
                    value: sample.value.1,
                })
                .collect());
        }

        // Anything but a vector becomes one unlabeled series
        tracing::warn!(result_type = ?data.result_type, "Rule query did not return a vector");
        Ok(vec![Series {
            metric: BTreeMap::new(),
            value: data.scalar_value().unwrap_or_default(),
        }])
    }

    fn observe(&mut self, fp: Fingerprint, series: &Series, now: DateTime<Utc>) {
        let labels = self.alert_labels(&series.metric);
        let for_duration = self.rule.for_duration;
        let templates = &self.rule.annotations;

        let alert = self.active.entry(fp).or_insert_with(|| Alert {
            state: AlertState::Pending,
            created_at: now,
            updated_at: now,
            fired_at: None,
            labels,
            annotations: templates.clone(),
            value: series.value.clone(),
        });
        alert.value = series.value.clone();

        match alert.state {
            AlertState::Pending if elapsed(alert.created_at, now) >= for_duration => {
                alert.state = AlertState::Firing;
                alert.fired_at = Some(now);
                alert.updated_at = now;
                alert.annotations = render_annotations(templates, &series.value, &series.metric);
            }
            AlertState::Firing => {
                alert.updated_at = now;
                alert.annotations = render_annotations(templates, &series.value, &series.metric);
            }
            _ => {}
        }
    }

    /// series labels, overridden by common labels, overridden by rule labels
    fn alert_labels(&self, metric: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut labels: BTreeMap<String, String> = metric
            .iter()
            .filter(|(k, _)| k.as_str() != "__name__")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.extend(self.common_labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        labels.extend(self.rule.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        labels.insert(ALERTNAME_LABEL.to_string(), self.name().to_string());
        labels.insert(FIRER_LABEL.to_string(), FIRER_NAME.to_string());
        labels
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}

fn render_annotations(
    templates: &BTreeMap<String, String>,
    value: &str,
    labels: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    templates
        .iter()
        .map(|(k, t)| (k.clone(), render_or_raw(t, value, labels)))
        .collect()
}
