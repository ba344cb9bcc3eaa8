use async_trait::async_trait;
use kube::Client;
use tracing::instrument;

use super::{ProbeError, PrometheusTarget, QueryExecutor, count_series};

/// Reaches Prometheus through the API server's pod proxy subresource, so
/// the controller needs no direct network path into the cell namespace.
#[derive(Clone)]
pub struct PodProxyExecutor {
    client: Client,
}

impl PodProxyExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

pub fn proxy_path(target: &PrometheusTarget, query: &str) -> String {
    format!(
        "/api/v1/namespaces/{}/pods/{}:{}/proxy/api/v1/query?query={}",
        target.namespace,
        target.pod,
        target.port,
        urlencoding::encode(query)
    )
}

#[async_trait]
impl QueryExecutor for PodProxyExecutor {
    #[instrument(skip(self), fields(ns = %target.namespace, pod = %target.pod))]
    async fn series_count(&self, target: &PrometheusTarget, query: &str) -> Result<usize, ProbeError> {
        let req = http::Request::get(proxy_path(target, query))
            .body(Vec::new())
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        let body = self.client.request_text(req).await.map_err(|e| match e {
            kube::Error::Api(ae) => ProbeError::Status {
                code: ae.code,
                body: ae.message.clone(),
            },
            other => ProbeError::Transport(other.to_string()),
        })?;
        count_series(body.as_bytes())
    }
}
