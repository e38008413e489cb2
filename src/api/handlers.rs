use axum::{
    extract::{Path, Query, RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerting::{RuleStatus, StatusBoard};
use crate::datasource::{Datasource, DatasourceType, Registry, RegistryError};
use crate::remote::{Action, RemoteClient};

/// Application state shared across handlers
pub struct AppState {
    pub registry: Arc<Registry>,
    pub client: RemoteClient,
    pub status: StatusBoard,
}

/// Success envelope, matching the datasource query API shape
#[derive(Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> Envelope<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            data,
        })
    }
}

// ============================================================================
// Health Check
// ============================================================================

pub async fn healthy() -> &'static str {
    "Venti is Healthy.\n"
}

pub async fn ready() -> &'static str {
    "Venti is Ready.\n"
}

// ============================================================================
// Datasources
// ============================================================================

pub async fn list_datasources(State(state): State<Arc<AppState>>) -> Json<Envelope<Vec<Datasource>>> {
    Envelope::success(state.registry.get_all())
}

pub async fn reload_datasources(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Envelope<Vec<Datasource>>>, ApiError> {
    state
        .registry
        .reload()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Envelope::success(state.registry.get_all()))
}

#[derive(Serialize)]
pub struct DatasourceHealth {
    pub name: String,
    #[serde(rename = "type")]
    pub ds_type: DatasourceType,
    pub url: String,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Probe every datasource concurrently
pub async fn datasources_health(
    State(state): State<Arc<AppState>>,
) -> Json<Envelope<Vec<DatasourceHealth>>> {
    let datasources = state.registry.snapshot();

    let futures: Vec<_> = datasources
        .iter()
        .map(|ds| {
            let client = &state.client;
            async move {
                let (healthy, error) = match client.health_check(ds).await {
                    Ok(healthy) => (healthy, None),
                    Err(e) => {
                        tracing::warn!(datasource = %ds.name, error = %e, "Health check failed");
                        (false, Some(e.to_string()))
                    }
                };
                DatasourceHealth {
                    name: ds.name.clone(),
                    ds_type: ds.ds_type,
                    url: ds.url.clone(),
                    healthy,
                    error,
                }
            }
        })
        .collect();

    Envelope::success(futures::future::join_all(futures).await)
}

// ============================================================================
// Remote Query
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteParams {
    pub ds_name: Option<String>,
    pub ds_type: Option<String>,
}

fn remote_action(name: &str) -> Option<Action> {
    match name {
        "metadata" => Some(Action::Metadata),
        "query" => Some(Action::Query),
        "query_range" => Some(Action::QueryRange),
        "targets" => Some(Action::Targets),
        _ => None,
    }
}

/// Datasource named by `dsName`, else the main datasource of `dsType`
fn pick_datasource(registry: &Registry, params: &RemoteParams) -> Result<Datasource, ApiError> {
    if let Some(name) = params.ds_name.as_deref().filter(|n| !n.is_empty()) {
        return Ok(registry.get_by_name(name)?);
    }

    let ds_type = match params.ds_type.as_deref().filter(|t| !t.is_empty()) {
        Some(raw) => raw
            .parse::<DatasourceType>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => DatasourceType::Prometheus,
    };
    Ok(registry.get_main_by_type(ds_type)?)
}

/// Forward the raw query to the selected datasource and relay its reply
pub async fn remote(
    State(state): State<Arc<AppState>>,
    Path(action): Path<String>,
    Query(params): Query<RemoteParams>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let action = remote_action(&action)
        .ok_or_else(|| ApiError::NotFound(format!("unknown remote action '{}'", action)))?;
    let datasource = pick_datasource(&state.registry, &params)?;

    let reply = state
        .client
        .fetch(&datasource, action, raw_query.as_deref().unwrap_or_default())
        .await
        .map_err(|e| {
            tracing::warn!(datasource = %datasource.name, error = %e, "Remote query failed");
            ApiError::Internal(e.to_string())
        })?;

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, reply.body).into_response();
    match reply.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
        Some(content_type) => {
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
        }
        None => {
            response.headers_mut().remove(header::CONTENT_TYPE);
        }
    }
    Ok(response)
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Serialize)]
pub struct RulesData {
    pub rules: Vec<RuleStatus>,
}

pub async fn alerts(State(state): State<Arc<AppState>>) -> Json<Envelope<RulesData>> {
    Envelope::success(RulesData {
        rules: state.status.snapshot().to_vec(),
    })
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) | RegistryError::IndexOutOfRange { .. } => {
                ApiError::NotFound(err.to_string())
            }
            RegistryError::NoMainDatasource(_) => ApiError::Unavailable(err.to_string()),
            RegistryError::InvalidConfig(_) | RegistryError::Discovery(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_data", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };

        let body = serde_json::json!({
            "status": "error",
            "errorType": error_type,
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
