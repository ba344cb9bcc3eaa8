use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use super::{ProbeError, PrometheusTarget, QueryExecutor, count_series};

/// Queries Prometheus over plain HTTP. The base URL is a template where
/// `{cell}` and `{namespace}` are substituted per target, e.g.
/// `http://prometheus-{cell}.{namespace}.svc:9090`.
#[derive(Clone)]
pub struct HttpQueryExecutor {
    client: reqwest::Client,
    url_template: String,
}

impl HttpQueryExecutor {
    pub fn new(url_template: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;
        Ok(Self {
            client,
            url_template: url_template.into(),
        })
    }

    pub fn base_url(&self, target: &PrometheusTarget) -> String {
        self.url_template
            .replace("{cell}", &target.cell)
            .replace("{namespace}", &target.namespace)
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    #[instrument(skip(self), fields(ns = %target.namespace, cell = %target.cell))]
    async fn series_count(&self, target: &PrometheusTarget, query: &str) -> Result<usize, ProbeError> {
        let url = format!("{}/api/v1/query", self.base_url(target));
        let res = self
            .client
            .get(url)
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        let code = res.status();
        let body = res
            .bytes()
            .await
            .map_err(|e| ProbeError::Transport(e.to_string()))?;
        // Prometheus reports bad queries as 400/422 with a JSON error body
        if !code.is_success() && !matches!(code.as_u16(), 400 | 422) {
            return Err(ProbeError::Status {
                code: code.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        count_series(&body)
    }
}
