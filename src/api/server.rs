use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    alerts, datasources_health, healthy, list_datasources, ready, reload_datasources, remote,
    AppState,
};
use crate::alerting::{Evaluator, Notifier};
use crate::config::VentiConfig;
use crate::datasource::{Discoverer, Registry};
use crate::remote::RemoteClient;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/-/healthy", get(healthy))
        .route("/-/ready", get(ready))
        // Datasources
        .route("/api/v1/datasources", get(list_datasources))
        .route("/api/v1/datasources/reload", post(reload_datasources))
        .route("/api/v1/datasources/healthy", get(datasources_health))
        // Remote query proxy
        .route("/api/v1/remote/:action", get(remote))
        // Alerts
        .route("/api/v1/alerts", get(alerts))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Load datasources, start the rule evaluator and serve HTTP until ctrl-c
pub async fn run_server(
    config: VentiConfig,
    discoverer: Arc<dyn Discoverer>,
) -> Result<(), Box<dyn std::error::Error>> {
    let query_timeout = config.datasource.query_timeout;

    // Initial load; discovery failure here is fatal
    let registry = Arc::new(Registry::new(config.datasource.clone(), discoverer).await?);
    tracing::info!("Loaded {} datasources", registry.len());

    let client = RemoteClient::new(query_timeout)?;
    let notifier = Notifier::new(
        config.alerting.alertmanager_url().map(str::to_string),
        query_timeout,
    )?
    .with_generator_url(config.evaluator.external_url.clone());

    // Start background evaluation
    let evaluator = Evaluator::new(
        &config.rule_files,
        &registry,
        client.clone(),
        notifier,
        config.evaluator.clone(),
    );
    let evaluator_handle = evaluator.start();

    let state = Arc::new(AppState {
        registry: Arc::clone(&registry),
        client,
        status: evaluator_handle.status_board(),
    });

    // Build router
    let app = build_router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Starting Venti server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Wait for the evaluator to finish its current cycle
    evaluator_handle.stop().await;

    tracing::info!("Venti server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping evaluator...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::StatusBoard;
    use crate::datasource::{Datasource, DatasourceConfig, DatasourceType, NoopDiscoverer};
    use crate::testutil::{spawn_backend, vector_body, BackendReply};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::util::ServiceExt;

    async fn create_test_app(datasources: Vec<Datasource>) -> Router {
        let config = DatasourceConfig {
            datasources,
            ..Default::default()
        };
        let registry = Registry::new(config, Arc::new(NoopDiscoverer)).await.unwrap();
        let state = Arc::new(AppState {
            registry: Arc::new(registry),
            client: RemoteClient::new(Duration::from_secs(5)).unwrap(),
            status: StatusBoard::default(),
        });
        build_router(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app(Vec::new()).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/-/healthy")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_datasources_hides_credentials() {
        let app = create_test_app(vec![
            Datasource::new(DatasourceType::Prometheus, "prom", "http://prom:9090")
                .with_basic_auth("admin", "secret"),
            Datasource::new(DatasourceType::Lethe, "lethe", "http://lethe:6060"),
        ])
        .await;

        let (status, body) = get_json(app, "/api/v1/datasources").await;

        assert_eq!(status, StatusCode::OK);
        let list = body["data"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["name"], "prom");
        assert_eq!(list[0]["isMain"], true);
        assert!(!body.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_remote_query_relays_backend_reply() {
        let backend = spawn_backend(BackendReply::fixed(200, vector_body(&[(&[("job", "api")], "1")]))).await;
        let app = create_test_app(vec![Datasource::new(DatasourceType::Prometheus, "prom", &backend.url)]).await;

        let (status, body) = get_json(app, "/api/v1/remote/query?query=up&time=1700000000").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["result"][0]["metric"]["job"], "api");

        let requests = backend.requests();
        assert_eq!(requests[0].path, "/api/v1/query");
        assert_eq!(requests[0].query.as_deref(), Some("query=up&time=1700000000"));
    }

    #[tokio::test]
    async fn test_remote_query_passes_error_status_through() {
        let backend = spawn_backend(BackendReply::fixed(
            422,
            r#"{"status":"error","errorType":"execution","error":"boom"}"#,
        ))
        .await;
        let app = create_test_app(vec![
            Datasource::new(DatasourceType::Prometheus, "prom", "http://unused:9090"),
            Datasource::new(DatasourceType::Prometheus, "prom2", &backend.url),
        ])
        .await;

        let (status, body) = get_json(app, "/api/v1/remote/query_range?dsName=prom2&query=up").await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errorType"], "execution");
        assert_eq!(backend.requests()[0].path, "/api/v1/query_range");
    }

    #[tokio::test]
    async fn test_remote_relays_backend_content_type() {
        let backend = spawn_backend(
            BackendReply::fixed(502, "<html>bad gateway</html>").with_content_type("text/html"),
        )
        .await;
        let app = create_test_app(vec![Datasource::new(DatasourceType::Prometheus, "prom", &backend.url)]).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/remote/metadata")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[axum::http::header::CONTENT_TYPE], "text/html");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"<html>bad gateway</html>");
    }

    #[tokio::test]
    async fn test_remote_selection_errors() {
        let app = create_test_app(vec![Datasource::new(
            DatasourceType::Prometheus,
            "prom",
            "http://prom:9090",
        )])
        .await;

        let (status, body) = get_json(app.clone(), "/api/v1/remote/query?dsName=missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");

        let (status, _) = get_json(app.clone(), "/api/v1/remote/query?dsType=graphite").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(app.clone(), "/api/v1/remote/query?dsType=lethe").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, _) = get_json(app, "/api/v1/remote/series").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_remote_transport_failure_is_500() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let app = create_test_app(vec![Datasource::new(DatasourceType::Prometheus, "dead", dead)]).await;
        let (status, body) = get_json(app, "/api/v1/remote/targets?state=active").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["errorType"], "internal");
    }

    #[tokio::test]
    async fn test_datasources_health() {
        let up = spawn_backend(BackendReply::fixed(200, "Prometheus is Healthy.")).await;
        let down = spawn_backend(BackendReply::fixed(503, "not ready")).await;
        let app = create_test_app(vec![
            Datasource::new(DatasourceType::Prometheus, "up", &up.url),
            Datasource::new(DatasourceType::Lethe, "down", &down.url),
        ])
        .await;

        let (status, body) = get_json(app, "/api/v1/datasources/healthy").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["healthy"], true);
        assert_eq!(body["data"][1]["healthy"], false);
        assert_eq!(up.requests()[0].path, "/-/healthy");
    }

    #[tokio::test]
    async fn test_alerts_empty_board() {
        let app = create_test_app(Vec::new()).await;

        let (status, body) = get_json(app, "/api/v1/alerts").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["data"]["rules"].as_array().unwrap().is_empty());
    }
}
