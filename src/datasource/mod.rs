//! Datasource registry and discovery

pub mod discovery;
pub mod registry;
pub mod types;

pub use discovery::{
    Discoverer, DiscoveryError, NoopDiscoverer, Service, ServiceDiscoverer, ServiceLister,
    ServicePort,
};
pub use registry::{Registry, RegistryError};
pub use types::{
    BasicAuth, Datasource, DatasourceConfig, DatasourceSelector, DatasourceType, DiscoveryConfig,
    System,
};
