//! Venti: Observability Gateway
//!
//! A single front door to a fleet of metric and log backends, with a built-in
//! alert rule evaluator.
//!
//! # Features
//!
//! - **Datasource Registry**: static and discovered Prometheus / Lethe backends,
//!   with one main datasource per type
//! - **Remote Queries**: timeout-bounded proxying of the query API, with
//!   backend status codes passed through
//! - **Alerting**: periodic rule evaluation with pending/firing state, label
//!   merging, annotation templates and Alertmanager delivery
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use venti::datasource::{Datasource, DatasourceConfig, DatasourceType, NoopDiscoverer, Registry};
//! use venti::remote::{Action, RemoteClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DatasourceConfig {
//!     datasources: vec![Datasource::new(DatasourceType::Prometheus, "prometheus", "http://prometheus:9090")],
//!     ..Default::default()
//! };
//! let registry = Registry::new(config, Arc::new(NoopDiscoverer)).await?;
//!
//! let client = RemoteClient::new(Duration::from_secs(30))?;
//! let main = registry.get_main_by_type(DatasourceType::Prometheus)?;
//! let (status, body) = client.get(&main, Action::Query, "query=up").await?;
//! println!("{}: {}", status, body);
//! # Ok(())
//! # }
//! ```

pub mod alerting;
pub mod api;
pub mod config;
pub mod datasource;
pub mod remote;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use alerting::{Evaluator, Notifier, StatusBoard};
pub use config::{ConfigError, VentiConfig};
pub use datasource::{Datasource, DatasourceType, Registry, RegistryError};
pub use remote::{RemoteClient, RemoteError};
