//! Venti Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - VENTI_HOST: Bind address (default: 0.0.0.0)
//! - VENTI_PORT: Port number (default: 8080)
//! - VENTI_CONFIG_DIR: Directory holding datasources.yml and alerting.yml (default: etc)
//! - VENTI_RULES_DIR: Directory of alert rule files (default: <config dir>/rules)
//! - VENTI_EVAL_INTERVAL_SECS: Seconds between evaluation cycles (default: 30)
//! - VENTI_RULE_DELAY_MS: Pause between two rule queries in a cycle (default: 500)
//! - VENTI_EXTERNAL_URL: Base URL sent as generatorURL on notifications
//! - RUST_LOG: Log level (default: info)
//!
//! The evaluator settings can also be set in the `evaluator` section of alerting.yml;
//! environment variables win.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use venti::api::run_server;
use venti::datasource::{Discoverer, NoopDiscoverer};
use venti::VentiConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "venti=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_dir =
        PathBuf::from(std::env::var("VENTI_CONFIG_DIR").unwrap_or_else(|_| "etc".to_string()));
    let rules_dir = std::env::var("VENTI_RULES_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config_dir.join("rules"));

    let mut config = VentiConfig::load(&config_dir, &rules_dir)?;

    // Parse basic configuration from environment
    if let Ok(host) = std::env::var("VENTI_HOST") {
        config.server.host = host;
    }
    if let Some(port) = std::env::var("VENTI_PORT").ok().and_then(|p| p.parse().ok()) {
        config.server.port = port;
    }
    if let Some(secs) = std::env::var("VENTI_EVAL_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|s| *s > 0)
    {
        config.evaluator.interval = Duration::from_secs(secs);
    }
    if let Some(ms) = std::env::var("VENTI_RULE_DELAY_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
    {
        config.evaluator.rule_delay = Duration::from_millis(ms);
    }
    if let Ok(url) = std::env::var("VENTI_EXTERNAL_URL") {
        config.evaluator.external_url = Some(url).filter(|u| !u.is_empty());
    }

    let discoverer: Arc<dyn Discoverer> = Arc::new(NoopDiscoverer);
    if config.datasource.discovery.enabled {
        tracing::warn!("Discovery is enabled but no service lister is available; only static datasources are used");
    }

    tracing::info!("Venti configuration:");
    tracing::info!("  Host: {}:{}", config.server.host, config.server.port);
    tracing::info!("  Config dir: {}", config_dir.display());
    tracing::info!("  Rules dir: {}", rules_dir.display());
    tracing::info!("  Query timeout: {:?}", config.datasource.query_timeout);
    tracing::info!("  Evaluation interval: {:?}", config.evaluator.interval);
    tracing::info!("  Rule delay: {:?}", config.evaluator.rule_delay);
    match config.alerting.alertmanager_url() {
        Some(url) => tracing::info!("  Alertmanager: {}", url),
        None => tracing::info!("  Alertmanager: DISABLED (alerts are logged)"),
    }

    println!(
        r#"
 __   __          _   _
 \ \ / /___ _ __ | |_(_)
  \ V // -_) '  \|  _| |
   \_/ \___|_||_| \__|_|

 Observability Gateway
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config, discoverer).await
}
