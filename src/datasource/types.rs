//! Datasource model types

use std::time::Duration;

use serde::de::IntoDeserializer;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::duration::serde_duration;

/// Backend kind behind a datasource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasourceType {
    /// Prometheus-compatible metrics API
    Prometheus,
    /// Lethe log API
    Lethe,
}

impl DatasourceType {
    pub const ALL: [DatasourceType; 2] = [DatasourceType::Prometheus, DatasourceType::Lethe];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasourceType::Prometheus => "prometheus",
            DatasourceType::Lethe => "lethe",
        }
    }
}

impl std::fmt::Display for DatasourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatasourceType {
    type Err = UnknownDatasourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prometheus" => Ok(DatasourceType::Prometheus),
            "lethe" => Ok(DatasourceType::Lethe),
            _ => Err(UnknownDatasourceType(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown datasource type '{0}'")]
pub struct UnknownDatasourceType(pub String);

/// HTTP basic auth credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A queryable backend, configured statically or discovered at runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    #[serde(rename = "type")]
    pub ds_type: DatasourceType,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing)]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default)]
    pub is_main: bool,
    #[serde(default)]
    pub is_discovered: bool,
}

impl Datasource {
    pub fn new(ds_type: DatasourceType, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            ds_type,
            name: name.into(),
            url: url.into(),
            basic_auth: None,
            is_main: false,
            is_discovered: false,
        }
    }

    pub fn with_main(mut self, is_main: bool) -> Self {
        self.is_main = is_main;
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_discovered(mut self, is_discovered: bool) -> Self {
        self.is_discovered = is_discovered;
        self
    }
}

/// Main/sub filter of a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    Main,
    Sub,
}

/// Filter over the resolved datasources.
///
/// `None` on either field means no constraint on that field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceSelector {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub system: Option<System>,
    #[serde(default, rename = "type", deserialize_with = "empty_as_none")]
    pub ds_type: Option<DatasourceType>,
}

impl DatasourceSelector {
    pub fn new(system: Option<System>, ds_type: Option<DatasourceType>) -> Self {
        Self { system, ds_type }
    }

    pub fn matches(&self, ds: &Datasource) -> bool {
        let system_ok = match self.system {
            None => true,
            Some(system) => ds.is_main == (system == System::Main),
        };
        let type_ok = match self.ds_type {
            None => true,
            Some(t) => ds.ds_type == t,
        };
        system_ok && type_ok
    }
}

/// Treats a missing, null or empty string value as `None`
fn empty_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => {
            let de: serde::de::value::StrDeserializer<'_, D::Error> = s.into_deserializer();
            T::deserialize(de).map(Some)
        }
    }
}

/// Runtime datasource discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub main_namespace: String,
    #[serde(default = "default_annotation_key")]
    pub annotation_key: String,
    /// Deprecated: classify services literally named `prometheus`
    #[serde(default)]
    pub by_name_prometheus: bool,
    /// Deprecated: classify services literally named `lethe`
    #[serde(default)]
    pub by_name_lethe: bool,
}

fn default_annotation_key() -> String {
    "kuoss.org/datasource-type".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            main_namespace: String::new(),
            annotation_key: default_annotation_key(),
            by_name_prometheus: false,
            by_name_lethe: false,
        }
    }
}

/// Datasource section of the gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceConfig {
    /// Upper bound on every remote query
    #[serde(default = "default_query_timeout", with = "serde_duration")]
    pub query_timeout: Duration,
    #[serde(default)]
    pub datasources: Vec<Datasource>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for DatasourceConfig {
    fn default() -> Self {
        Self {
            query_timeout: default_query_timeout(),
            datasources: Vec::new(),
            discovery: DiscoveryConfig::default(),
        }
    }
}
