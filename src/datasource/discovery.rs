//! Runtime datasource discovery
//!
//! The registry consumes discovery through the [`Discoverer`] trait. The
//! bundled [`ServiceDiscoverer`] classifies cluster services returned by a
//! [`ServiceLister`]; talking to the cluster API is left to the lister.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{Datasource, DatasourceType, DiscoveryConfig};

/// Source of additional datasources
#[async_trait]
pub trait Discoverer: Send + Sync {
    async fn discover(&self, config: &DiscoveryConfig) -> Result<Vec<Datasource>, DiscoveryError>;
}

/// Discoverer that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiscoverer;

#[async_trait]
impl Discoverer for NoopDiscoverer {
    async fn discover(&self, _config: &DiscoveryConfig) -> Result<Vec<Datasource>, DiscoveryError> {
        Ok(Vec::new())
    }
}

/// A cluster service as seen by discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default)]
    pub name: String,
    pub port: u16,
}

/// Lists services across all namespaces
#[async_trait]
pub trait ServiceLister: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, DiscoveryError>;
}

/// Discoverer that turns annotated (or, legacy, well-named) services into datasources
pub struct ServiceDiscoverer<L> {
    lister: L,
}

impl<L: ServiceLister> ServiceDiscoverer<L> {
    pub fn new(lister: L) -> Self {
        Self { lister }
    }

    /// Classify a single service, returning `None` when it is not a datasource
    pub fn classify(service: &Service, config: &DiscoveryConfig) -> Option<Datasource> {
        let ds_type = Self::service_type(service, config)?;

        // Prefer the port named "http", otherwise the first declared one
        let port = service
            .ports
            .iter()
            .find(|p| p.name == "http")
            .or_else(|| service.ports.first())?;

        let url = format!("http://{}.{}:{}", service.name, service.namespace, port.port);
        let is_main = !config.main_namespace.is_empty() && service.namespace == config.main_namespace;

        Some(
            Datasource::new(ds_type, format!("{}-{}", service.namespace, service.name), url)
                .with_main(is_main)
                .with_discovered(true),
        )
    }

    fn service_type(service: &Service, config: &DiscoveryConfig) -> Option<DatasourceType> {
        if let Some(value) = service.annotations.get(&config.annotation_key) {
            return match value.as_str() {
                "prometheus" => Some(DatasourceType::Prometheus),
                "lethe" => Some(DatasourceType::Lethe),
                _ => None,
            };
        }

        if config.by_name_prometheus && service.name == "prometheus" {
            return Some(DatasourceType::Prometheus);
        }
        if config.by_name_lethe && service.name == "lethe" {
            return Some(DatasourceType::Lethe);
        }
        None
    }
}

#[async_trait]
impl<L: ServiceLister> Discoverer for ServiceDiscoverer<L> {
    async fn discover(&self, config: &DiscoveryConfig) -> Result<Vec<Datasource>, DiscoveryError> {
        let services = self.lister.list_services().await?;
        let total = services.len();

        let datasources: Vec<Datasource> = services
            .iter()
            .filter_map(|svc| Self::classify(svc, config))
            .collect();

        tracing::debug!(
            services = total,
            datasources = datasources.len(),
            "Service discovery finished"
        );

        Ok(datasources)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to list services: {0}")]
    ListServices(String),

    #[error("Discovery unavailable: {0}")]
    Unavailable(String),
}
