//! Rule file and alerting configuration types

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration::serde_duration;
use crate::datasource::DatasourceSelector;

/// A rule file: shared labels, a datasource selector, and rule groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleFile {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub datasource_selector: DatasourceSelector,
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default, with = "serde_duration")]
    pub interval: Duration,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// An alerting or recording rule. Only alerting rules are evaluated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    pub expr: String,
    /// How long a series must stay present before its alert fires
    #[serde(default, rename = "for", with = "serde_duration")]
    pub for_duration: Duration,
    /// Parsed but not evaluated
    #[serde(default, with = "serde_duration")]
    pub keep_firing_for: Duration,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Rule {
    pub fn alerting(name: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            alert: Some(name.into()),
            expr: expr.into(),
            ..Default::default()
        }
    }

    pub fn with_for(mut self, for_duration: Duration) -> Self {
        self.for_duration = for_duration;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Alert name, or `None` for recording rules
    pub fn alert_name(&self) -> Option<&str> {
        self.alert.as_deref().filter(|name| !name.is_empty())
    }
}

/// Receiver types the gateway can deliver to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiverType {
    Alertmanager,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertReceiver {
    pub name: String,
    #[serde(rename = "type")]
    pub receiver_type: ReceiverType,
    pub url: String,
}

/// Where firing alerts go
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertingConfig {
    #[serde(default, alias = "receivers")]
    pub alertmanagers: Vec<AlertReceiver>,
}

impl AlertingConfig {
    /// URL of the first Alertmanager receiver
    pub fn alertmanager_url(&self) -> Option<&str> {
        self.alertmanagers
            .iter()
            .find(|r| r.receiver_type == ReceiverType::Alertmanager)
            .map(|r| r.url.as_str())
    }
}

/// Evaluation loop timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatorConfig {
    /// Time between the start of two cycles
    #[serde(default = "default_eval_interval", with = "serde_duration")]
    pub interval: Duration,
    /// Pause between two rule queries inside a cycle
    #[serde(default = "default_rule_delay", with = "serde_duration")]
    pub rule_delay: Duration,
    /// Base URL advertised as `generatorURL` on notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}

fn default_eval_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_rule_delay() -> Duration {
    Duration::from_millis(500)
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            interval: default_eval_interval(),
            rule_delay: default_rule_delay(),
            external_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{DatasourceType, System};

    const RULE_FILE: &str = r#"
kind: AlertRuleFile
commonLabels:
  rulefile: sample
  severity: info
datasourceSelector:
  system: main
  type: prometheus
groups:
  - name: sample
    interval: 1m
    limit: 0
    rules:
      - alert: S00-AlwaysOn
        expr: vector(1234)
        for: 0s
        labels:
          severity: silence
        annotations:
          summary: "value={{ $value }}"
      - alert: S01-Monday
        expr: day_of_week() == 1
        for: 1w
      - record: job:up:sum
        expr: sum by (job) (up)
"#;

    #[test]
    fn test_parse_rule_file() {
        let file: RuleFile = serde_yaml::from_str(RULE_FILE).unwrap();

        assert_eq!(file.kind, "AlertRuleFile");
        assert_eq!(file.common_labels.get("rulefile").map(String::as_str), Some("sample"));
        assert_eq!(file.datasource_selector.system, Some(System::Main));
        assert_eq!(file.datasource_selector.ds_type, Some(DatasourceType::Prometheus));

        let group = &file.groups[0];
        assert_eq!(group.interval, Duration::from_secs(60));
        assert_eq!(group.rules.len(), 3);
        assert_eq!(group.rules[0].alert_name(), Some("S00-AlwaysOn"));
        assert_eq!(group.rules[0].for_duration, Duration::ZERO);
        assert_eq!(group.rules[1].for_duration, Duration::from_secs(7 * 86400));
        assert_eq!(group.rules[2].alert_name(), None);
        assert_eq!(group.rules[2].record.as_deref(), Some("job:up:sum"));
    }

    #[test]
    fn test_rule_for_survives_serialization() {
        for (raw, expected) in [("3h", Duration::from_secs(3 * 3600)), ("1w", Duration::from_secs(7 * 86400))] {
            let rule: Rule = serde_yaml::from_str(&format!("alert: A\nexpr: up\nfor: {}\n", raw)).unwrap();
            assert_eq!(rule.for_duration, expected);

            let yaml = serde_yaml::to_string(&rule).unwrap();
            assert!(yaml.contains(&format!("for: {}", raw)));
            let back: Rule = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(back, rule);

            let json = serde_json::to_string(&rule).unwrap();
            let back: Rule = serde_json::from_str(&json).unwrap();
            assert_eq!(back.for_duration, expected);
        }
    }

    #[test]
    fn test_alertmanager_url() {
        let yaml = r#"
alertmanagers:
  - name: slack
    type: slack
    url: http://slack
  - name: am
    type: alertmanager
    url: http://alertmanager:9093
  - name: am2
    type: alertmanager
    url: http://alertmanager-2:9093
"#;
        let config: AlertingConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.alertmanager_url(), Some("http://alertmanager:9093"));
        assert_eq!(AlertingConfig::default().alertmanager_url(), None);
    }

    #[test]
    fn test_evaluator_config_defaults() {
        let config: EvaluatorConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.rule_delay, Duration::from_millis(500));
    }
}
