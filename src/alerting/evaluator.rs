//! Background alert rule evaluation

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

use super::config::{EvaluatorConfig, RuleFile};
use super::notifier::Notifier;
use super::rule::{Alert, AlertState, AlertingRule};
use crate::config::duration::serde_duration;
use crate::datasource::Registry;
use crate::remote::RemoteClient;

/// Shortest period the background loop will tick at
pub const MIN_EVAL_INTERVAL: Duration = Duration::from_millis(10);

/// Published view of one alerting rule, readable from request handlers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    pub name: String,
    pub expr: String,
    pub datasource: String,
    #[serde(rename = "for", with = "serde_duration")]
    pub for_duration: Duration,
    pub state: AlertState,
    pub alerts: Vec<Alert>,
    pub last_evaluation: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&AlertingRule> for RuleStatus {
    fn from(rule: &AlertingRule) -> Self {
        let mut alerts: Vec<Alert> = rule.active().values().cloned().collect();
        alerts.sort_by(|a, b| a.labels.cmp(&b.labels));

        Self {
            name: rule.name().to_string(),
            expr: rule.rule.expr.clone(),
            datasource: rule.datasource.name.clone(),
            for_duration: rule.rule.for_duration,
            state: rule.state(),
            alerts,
            last_evaluation: rule.last_evaluation(),
            last_error: rule.last_error().map(str::to_string),
        }
    }
}

/// Latest rule statuses, replaced wholesale after every cycle
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<Arc<Vec<RuleStatus>>>>,
}

impl StatusBoard {
    pub fn snapshot(&self) -> Arc<Vec<RuleStatus>> {
        Arc::clone(&self.inner.read())
    }

    fn publish(&self, statuses: Vec<RuleStatus>) {
        *self.inner.write() = Arc::new(statuses);
    }
}

/// Counters for one evaluation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub rules_evaluated: usize,
    pub rules_errored: usize,
    pub alerts_firing: usize,
    pub notification_failed: bool,
}

/// Owns every alerting rule and its alert state.
///
/// Rules are evaluated sequentially in registration order; the state is
/// only touched by the evaluation loop.
pub struct Evaluator {
    rules: Vec<AlertingRule>,
    client: RemoteClient,
    notifier: Notifier,
    config: EvaluatorConfig,
    status: StatusBoard,
}

impl Evaluator {
    /// Bind every alerting rule to every datasource its file selects
    pub fn new(
        rule_files: &[RuleFile],
        registry: &Registry,
        client: RemoteClient,
        notifier: Notifier,
        config: EvaluatorConfig,
    ) -> Self {
        let mut rules = Vec::new();

        for file in rule_files {
            let datasources = registry.get_with_selector(&file.datasource_selector);
            if datasources.is_empty() {
                tracing::warn!(
                    kind = %file.kind,
                    selector = ?file.datasource_selector,
                    "No datasource matches rule file selector"
                );
            }

            for group in &file.groups {
                for rule in &group.rules {
                    if rule.alert_name().is_none() {
                        tracing::debug!(group = %group.name, expr = %rule.expr, "Skipping recording rule");
                        continue;
                    }
                    for ds in &datasources {
                        rules.push(AlertingRule::new(
                            file.datasource_selector,
                            file.common_labels.clone(),
                            rule.clone(),
                            ds.clone(),
                        ));
                    }
                }
            }
        }

        tracing::info!(rules = rules.len(), "Alerting rules registered");

        let status = StatusBoard::default();
        status.publish(rules.iter().map(RuleStatus::from).collect());

        Self {
            rules,
            client,
            notifier,
            config,
            status,
        }
    }

    pub fn rules(&self) -> &[AlertingRule] {
        &self.rules
    }

    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Run one full cycle: query each rule, update state, notify firing alerts
    pub async fn evaluate_once(&mut self) -> EvaluationSummary {
        let mut summary = EvaluationSummary::default();

        for i in 0..self.rules.len() {
            if i > 0 && !self.config.rule_delay.is_zero() {
                tokio::time::sleep(self.config.rule_delay).await;
            }

            summary.rules_evaluated += 1;
            if !Self::evaluate_rule(&self.client, &mut self.rules[i]).await {
                summary.rules_errored += 1;
            }
        }

        let batch: Vec<Alert> = self
            .rules
            .iter()
            .flat_map(|r| r.firing_alerts().cloned())
            .collect();
        summary.alerts_firing = batch.len();

        if let Err(e) = self.notifier.send(&batch).await {
            summary.notification_failed = true;
            tracing::error!(error = %e, alerts = batch.len(), "Failed to send alerts");
        }

        self.status.publish(self.rules.iter().map(RuleStatus::from).collect());

        tracing::debug!(
            evaluated = summary.rules_evaluated,
            errored = summary.rules_errored,
            firing = summary.alerts_firing,
            "Evaluation cycle finished"
        );

        summary
    }

    /// Returns false when the rule could not be evaluated this cycle
    async fn evaluate_rule(client: &RemoteClient, rule: &mut AlertingRule) -> bool {
        let now = Utc::now();

        let response = match client.query_instant(&rule.datasource, &rule.rule.expr, now).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    rule = %rule.name(),
                    datasource = %rule.datasource.name,
                    error = %e,
                    "Rule query failed"
                );
                rule.record_error(e.to_string(), now);
                return false;
            }
        };

        if !response.is_success() {
            let error = format!(
                "{}: {}",
                response.error_type.as_deref().unwrap_or("unknown"),
                response.error.as_deref().unwrap_or("")
            );
            tracing::warn!(
                rule = %rule.name(),
                datasource = %rule.datasource.name,
                error = %error,
                "Rule query returned an error"
            );
            rule.record_error(error, now);
            return false;
        }

        let Some(data) = response.data else {
            tracing::warn!(rule = %rule.name(), "Rule query returned no data");
            rule.record_error("response has no data", now);
            return false;
        };

        if let Err(e) = rule.apply(&data, now) {
            tracing::warn!(rule = %rule.name(), error = %e, "Failed to decode rule query result");
            rule.record_error(e.to_string(), now);
            return false;
        }

        true
    }

    /// Start the background loop
    pub fn start(mut self) -> EvaluatorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let status = self.status.clone();
        let period = self.config.interval.max(MIN_EVAL_INTERVAL);
        if period != self.config.interval {
            tracing::warn!(
                configured = ?self.config.interval,
                using = ?period,
                "Evaluation interval too short, clamped"
            );
        }

        let join = tokio::spawn(async move {
            tracing::info!("Rule evaluator started with interval {:?}", period);

            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.evaluate_once().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Rule evaluator shutting down");
                        break;
                    }
                }
            }
        });

        EvaluatorHandle {
            shutdown_tx,
            join,
            status,
        }
    }
}

/// Handle to a running evaluation loop
pub struct EvaluatorHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: tokio::task::JoinHandle<()>,
    status: StatusBoard,
}

impl EvaluatorHandle {
    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Stop after the current cycle and wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Rule evaluator task failed");
        }
    }
}
