//! Live readiness queries against a cell's Prometheus.

use async_trait::async_trait;
use serde_json::Value;

use crate::crd::Cell;
use crate::templates::{TemplateError, cell_namespace, prometheus};

pub mod direct;
#[cfg(any(test, feature = "testing"))]
pub mod fixed;
pub mod proxy;

pub use direct::HttpQueryExecutor;
#[cfg(any(test, feature = "testing"))]
pub use fixed::FixedProbe;
pub use proxy::PodProxyExecutor;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("query transport failed: {0}")]
    Transport(String),
    #[error("prometheus answered {code}: {body}")]
    Status { code: u16, body: String },
    #[error("query failed ({error_type}): {error}")]
    Unsuccessful { error_type: String, error: String },
    #[error("cannot decode query response: {0}")]
    Decode(String),
    #[error("probe misconfigured: {0}")]
    Config(String),
}

impl From<TemplateError> for ProbeError {
    fn from(e: TemplateError) -> Self {
        ProbeError::Config(e.to_string())
    }
}

/// Where a cell's Prometheus answers queries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrometheusTarget {
    pub cell: String,
    pub namespace: String,
    pub pod: String,
    pub port: u16,
}

impl PrometheusTarget {
    pub fn for_cell(cell: &Cell, port: u16) -> Result<Self, ProbeError> {
        Ok(Self {
            cell: kube::ResourceExt::name_any(cell),
            namespace: cell_namespace(cell)?,
            pod: prometheus::pod_name(cell),
            port,
        })
    }
}

/// Executes an instant query and reports how many series it returned.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn series_count(&self, target: &PrometheusTarget, query: &str) -> Result<usize, ProbeError>;
}

/// `up{job="<job>"} == 1`
pub fn up_query(job: &str) -> String {
    format!("up{{job=\"{job}\"}} == 1")
}

/// Counts the series in a `/api/v1/query` response body.
pub fn count_series(body: &[u8]) -> Result<usize, ProbeError> {
    let v: Value = serde_json::from_slice(body).map_err(|e| ProbeError::Decode(e.to_string()))?;
    match v.get("status").and_then(Value::as_str) {
        Some("success") => {}
        Some(_) => {
            let field = |k: &str| {
                v.get(k)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            return Err(ProbeError::Unsuccessful {
                error_type: field("errorType"),
                error: field("error"),
            });
        }
        None => return Err(ProbeError::Decode("missing status".into())),
    }
    v.get("data")
        .and_then(|d| d.get("result"))
        .and_then(Value::as_array)
        .map(Vec::len)
        .ok_or_else(|| ProbeError::Decode("missing data.result".into()))
}
