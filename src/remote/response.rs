//! Query API response envelope shared by Prometheus and Lethe

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Vector,
    Matrix,
    Scalar,
    String,
    #[serde(other)]
    None,
}

/// `{status, data, errorType, error, warnings}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }

    /// Error envelope as returned by the gateway itself
    pub fn error(error_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            data: None,
            error_type: Some(error_type.into()),
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub result_type: ResultType,
    #[serde(default)]
    pub result: serde_json::Value,
}

impl QueryData {
    /// Decode the result as an instant vector
    pub fn vector(&self) -> Result<Vec<Sample>, serde_json::Error> {
        Vec::<Sample>::deserialize(&self.result)
    }

    /// Value of a scalar or string result, `[ts, "value"]`
    pub fn scalar_value(&self) -> Option<String> {
        match self.result_type {
            ResultType::Scalar | ResultType::String => self
                .result
                .get(1)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        }
    }
}

/// One series of an instant vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// `[unix_seconds, "value"]`
    pub value: (f64, String),
}
