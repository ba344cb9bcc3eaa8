use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ProbeError, PrometheusTarget, QueryExecutor};

/// Canned answers keyed by query string. Unknown queries return zero series.
#[derive(Default)]
pub struct FixedProbe {
    answers: Mutex<HashMap<String, Result<usize, ProbeError>>>,
    queries: Mutex<Vec<String>>,
}

impl FixedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, query: impl Into<String>, result: Result<usize, ProbeError>) -> &Self {
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(query.into(), result);
        self
    }

    /// Queries seen so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl QueryExecutor for FixedProbe {
    async fn series_count(&self, _target: &PrometheusTarget, query: &str) -> Result<usize, ProbeError> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());
        self.answers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(query)
            .cloned()
            .unwrap_or(Ok(0))
    }
}
