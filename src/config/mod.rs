//! Gateway configuration loaded from a config directory

pub mod duration;

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::alerting::{AlertingConfig, EvaluatorConfig, RuleFile};
use crate::api::ServerConfig;
use crate::datasource::DatasourceConfig;

pub const DATASOURCES_FILE: &str = "datasources.yml";
pub const ALERTING_FILE: &str = "alerting.yml";

/// Everything the gateway needs at startup
#[derive(Debug, Clone, Default)]
pub struct VentiConfig {
    pub datasource: DatasourceConfig,
    pub alerting: AlertingConfig,
    pub rule_files: Vec<RuleFile>,
    pub evaluator: EvaluatorConfig,
    pub server: ServerConfig,
}

/// `alerting.yml`: receivers plus an optional `evaluator` section
#[derive(Debug, Default, Deserialize)]
struct AlertingFile {
    #[serde(flatten)]
    alerting: AlertingConfig,
    #[serde(default)]
    evaluator: EvaluatorConfig,
}

impl VentiConfig {
    /// Load `datasources.yml` and `alerting.yml` from `config_dir` and every
    /// rule file under `rules_dir`. Missing files yield defaults.
    pub fn load(config_dir: &Path, rules_dir: &Path) -> Result<Self, ConfigError> {
        let datasource: DatasourceConfig = load_optional(&config_dir.join(DATASOURCES_FILE))?;

        let alerting_path = config_dir.join(ALERTING_FILE);
        let AlertingFile {
            alerting,
            evaluator,
        } = load_optional(&alerting_path)?;
        if evaluator.interval.is_zero() {
            return Err(ConfigError::Invalid {
                path: alerting_path,
                reason: "evaluator.interval must be greater than zero".to_string(),
            });
        }

        let rule_files = load_rule_files(rules_dir)?;

        tracing::info!(
            config_dir = %config_dir.display(),
            datasources = datasource.datasources.len(),
            rule_files = rule_files.len(),
            "Configuration loaded"
        );

        Ok(Self {
            datasource,
            alerting,
            rule_files,
            evaluator,
            ..Default::default()
        })
    }
}

/// Parse every `*.yml` / `*.yaml` file in `dir`, in file name order
pub fn load_rule_files(dir: &Path) -> Result<Vec<RuleFile>, ConfigError> {
    if !dir.exists() {
        tracing::warn!(dir = %dir.display(), "Rules directory not found, no rules loaded");
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|source| ConfigError::Read {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_yaml(path))
        .collect();
    paths.sort();

    paths.iter().map(|path| load_file(path)).collect()
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

fn load_optional<T: DeserializeOwned + Default>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        return Ok(T::default());
    }
    load_file(path)
}

fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid config in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::DatasourceType;
    use std::time::Duration;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_load_full_directory() {
        let config_dir = tempfile::tempdir().unwrap();
        let rules_dir = tempfile::tempdir().unwrap();

        write(
            config_dir.path(),
            DATASOURCES_FILE,
            r#"
queryTimeout: 10s
datasources:
  - name: prometheus
    type: prometheus
    url: http://prometheus:9090
    isMain: true
  - name: lethe
    type: lethe
    url: http://lethe:6060
discovery:
  enabled: false
"#,
        );
        write(
            config_dir.path(),
            ALERTING_FILE,
            "alertmanagers:\n  - name: am\n    type: alertmanager\n    url: http://am:9093\n",
        );
        write(
            rules_dir.path(),
            "b.yaml",
            "datasourceSelector:\n  type: lethe\ngroups:\n  - name: b\n    rules:\n      - alert: B\n        expr: x\n",
        );
        write(
            rules_dir.path(),
            "a.yml",
            "datasourceSelector:\n  type: prometheus\ngroups:\n  - name: a\n    rules:\n      - alert: A\n        expr: up\n",
        );
        write(rules_dir.path(), "notes.txt", "not a rule file");

        let config = VentiConfig::load(config_dir.path(), rules_dir.path()).unwrap();

        assert_eq!(config.datasource.query_timeout, Duration::from_secs(10));
        assert_eq!(config.datasource.datasources.len(), 2);
        assert_eq!(config.datasource.datasources[1].ds_type, DatasourceType::Lethe);
        assert_eq!(config.alerting.alertmanager_url(), Some("http://am:9093"));

        let names: Vec<&str> = config
            .rule_files
            .iter()
            .map(|f| f.groups[0].name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_files_use_defaults() {
        let config_dir = tempfile::tempdir().unwrap();
        let missing_rules = config_dir.path().join("rules");

        let config = VentiConfig::load(config_dir.path(), &missing_rules).unwrap();

        assert!(config.datasource.datasources.is_empty());
        assert_eq!(config.datasource.query_timeout, Duration::from_secs(30));
        assert_eq!(config.alerting.alertmanager_url(), None);
        assert!(config.rule_files.is_empty());
        assert_eq!(config.evaluator, EvaluatorConfig::default());
    }

    #[test]
    fn test_evaluator_section_is_loaded() {
        let config_dir = tempfile::tempdir().unwrap();
        write(
            config_dir.path(),
            ALERTING_FILE,
            r#"
alertmanagers:
  - name: am
    type: alertmanager
    url: http://am:9093
evaluator:
  interval: 1m
  ruleDelay: 250ms
  externalUrl: http://venti.example:8080
"#,
        );

        let config = VentiConfig::load(config_dir.path(), &config_dir.path().join("rules")).unwrap();

        assert_eq!(config.alerting.alertmanager_url(), Some("http://am:9093"));
        assert_eq!(config.evaluator.interval, Duration::from_secs(60));
        assert_eq!(config.evaluator.rule_delay, Duration::from_millis(250));
        assert_eq!(
            config.evaluator.external_url.as_deref(),
            Some("http://venti.example:8080")
        );
    }

    #[test]
    fn test_zero_evaluation_interval_is_rejected() {
        let config_dir = tempfile::tempdir().unwrap();
        write(config_dir.path(), ALERTING_FILE, "evaluator:\n  interval: 0s\n");

        let result = VentiConfig::load(config_dir.path(), config_dir.path());
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let config_dir = tempfile::tempdir().unwrap();
        write(config_dir.path(), DATASOURCES_FILE, "datasources: [ {name: x, type: graphite");

        let result = VentiConfig::load(config_dir.path(), config_dir.path());
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_invalid_rule_file_is_an_error() {
        let rules_dir = tempfile::tempdir().unwrap();
        write(rules_dir.path(), "bad.yml", "groups:\n  - name: g\n    rules:\n      - alert: A\n        for: soon\n        expr: up\n");

        let result = load_rule_files(rules_dir.path());
        match result {
            Err(ConfigError::Parse { path, .. }) => assert!(path.ends_with("bad.yml")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
