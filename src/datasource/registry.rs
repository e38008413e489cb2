//! Datasource registry
//!
//! Holds the resolved view of static and discovered datasources. Readers get
//! an immutable snapshot; `load`/`reload` build a new one and swap it in.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::discovery::{Discoverer, DiscoveryError};
use super::types::{Datasource, DatasourceConfig, DatasourceSelector, DatasourceType};

/// Resolved set of datasources shared by the query handlers and the evaluator
pub struct Registry {
    config: DatasourceConfig,
    discoverer: Arc<dyn Discoverer>,
    datasources: RwLock<Arc<Vec<Datasource>>>,
}

impl Registry {
    /// Validate the static configuration and perform the initial load.
    ///
    /// Discovery failures are fatal here and are not retried.
    pub async fn new(
        config: DatasourceConfig,
        discoverer: Arc<dyn Discoverer>,
    ) -> Result<Self, RegistryError> {
        validate_static(&config.datasources)?;

        let registry = Self {
            config,
            discoverer,
            datasources: RwLock::new(Arc::new(Vec::new())),
        };
        registry.load().await?;
        Ok(registry)
    }

    /// Merge discovered and static datasources, resolve mains, publish.
    pub async fn load(&self) -> Result<(), RegistryError> {
        let discovered = if self.config.discovery.enabled {
            self.discoverer.discover(&self.config.discovery).await?
        } else {
            Vec::new()
        };

        let merged = merge(discovered, &self.config.datasources);
        let resolved = resolve_mains(merged);

        tracing::info!(
            total = resolved.len(),
            discovered = resolved.iter().filter(|d| d.is_discovered).count(),
            "Datasources loaded"
        );
        for ds in resolved.iter() {
            tracing::debug!(
                name = %ds.name,
                ds_type = %ds.ds_type,
                url = %ds.url,
                is_main = ds.is_main,
                is_discovered = ds.is_discovered,
                "Datasource"
            );
        }

        *self.datasources.write() = Arc::new(resolved);
        Ok(())
    }

    /// Force a refresh. On error the previous snapshot stays in place.
    pub async fn reload(&self) -> Result<(), RegistryError> {
        tracing::info!("Reloading datasources");
        self.load().await.map_err(|e| {
            tracing::error!(error = %e, "Datasource reload failed");
            e
        })
    }

    /// Current snapshot, cheap to clone and never torn by a concurrent reload
    pub fn snapshot(&self) -> Arc<Vec<Datasource>> {
        Arc::clone(&self.datasources.read())
    }

    pub fn get_all(&self) -> Vec<Datasource> {
        self.snapshot().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.datasources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_by_index(&self, index: usize) -> Result<Datasource, RegistryError> {
        let snapshot = self.snapshot();
        snapshot
            .get(index)
            .cloned()
            .ok_or(RegistryError::IndexOutOfRange {
                index,
                len: snapshot.len(),
            })
    }

    pub fn get_by_name(&self, name: &str) -> Result<Datasource, RegistryError> {
        self.snapshot()
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn get_main_by_type(&self, ds_type: DatasourceType) -> Result<Datasource, RegistryError> {
        self.snapshot()
            .iter()
            .find(|d| d.ds_type == ds_type && d.is_main)
            .cloned()
            .ok_or(RegistryError::NoMainDatasource(ds_type))
    }

    pub fn get_with_selector(&self, selector: &DatasourceSelector) -> Vec<Datasource> {
        self.snapshot()
            .iter()
            .filter(|d| selector.matches(d))
            .cloned()
            .collect()
    }
}

/// Reject static configs that could break the one-main-per-type invariant or
/// produce unusable datasources.
fn validate_static(datasources: &[Datasource]) -> Result<(), RegistryError> {
    let mut names = HashSet::new();
    let mut mains = HashSet::new();

    for ds in datasources {
        if ds.name.trim().is_empty() {
            return Err(RegistryError::InvalidConfig(format!(
                "datasource with url '{}' has no name",
                ds.url
            )));
        }
        if !names.insert(ds.name.as_str()) {
            return Err(RegistryError::InvalidConfig(format!(
                "duplicate datasource name '{}'",
                ds.name
            )));
        }

        let url = reqwest::Url::parse(&ds.url).map_err(|e| {
            RegistryError::InvalidConfig(format!("datasource '{}': invalid url: {}", ds.name, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RegistryError::InvalidConfig(format!(
                "datasource '{}': unsupported scheme '{}'",
                ds.name,
                url.scheme()
            )));
        }

        if ds.is_main && !mains.insert(ds.ds_type) {
            return Err(RegistryError::InvalidConfig(format!(
                "more than one main datasource of type {}",
                ds.ds_type
            )));
        }
    }

    Ok(())
}

/// Discovered datasources first, then static ones. A static datasource
/// replaces a discovered one with the same name.
fn merge(discovered: Vec<Datasource>, configured: &[Datasource]) -> Vec<Datasource> {
    let configured_names: HashSet<&str> = configured.iter().map(|d| d.name.as_str()).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(discovered.len() + configured.len());

    for ds in discovered {
        if configured_names.contains(ds.name.as_str()) {
            tracing::warn!(name = %ds.name, "Discovered datasource shadowed by static config");
            continue;
        }
        if !seen.insert(ds.name.clone()) {
            tracing::warn!(name = %ds.name, "Duplicate discovered datasource ignored");
            continue;
        }
        merged.push(ds);
    }

    for ds in configured {
        merged.push(Datasource {
            is_discovered: false,
            ..ds.clone()
        });
    }

    merged
}

/// Leave exactly one main per present type. A static main beats a discovered
/// one; a type without a main promotes its first datasource.
fn resolve_mains(mut datasources: Vec<Datasource>) -> Vec<Datasource> {
    for ds_type in DatasourceType::ALL {
        let chosen = datasources
            .iter()
            .position(|d| d.ds_type == ds_type && d.is_main && !d.is_discovered)
            .or_else(|| datasources.iter().position(|d| d.ds_type == ds_type && d.is_main))
            .or_else(|| datasources.iter().position(|d| d.ds_type == ds_type));

        let Some(chosen) = chosen else {
            continue;
        };
        for (i, ds) in datasources.iter_mut().enumerate() {
            if ds.ds_type != ds_type {
                continue;
            }
            let is_main = i == chosen;
            if ds.is_main && !is_main {
                tracing::warn!(name = %ds.name, ds_type = %ds_type, "Extra main datasource demoted");
            } else if !ds.is_main && is_main {
                tracing::debug!(name = %ds.name, ds_type = %ds_type, "Promoted to main datasource");
            }
            ds.is_main = is_main;
        }
    }
    datasources
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid datasource config: {0}")]
    InvalidConfig(String),

    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Datasource index {index} out of range (have {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Datasource '{0}' not found")]
    NotFound(String),

    #[error("No main datasource of type {0}")]
    NoMainDatasource(DatasourceType),
}
