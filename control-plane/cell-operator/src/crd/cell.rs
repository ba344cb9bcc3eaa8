use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::monitoring::RemoteWriteSpec;

pub const CELL_GROUP: &str = "monitoring.gitpod.io";
pub const CELL_VERSION: &str = "v1alpha1";
pub const CELL_API_VERSION: &str = "monitoring.gitpod.io/v1alpha1";
pub const CELL_KIND: &str = "Cell";

/// A monitoring cell: one Prometheus stack scraping one cluster segment.
#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "monitoring.gitpod.io",
    version = "v1alpha1",
    kind = "Cell",
    plural = "cells",
    shortname = "cell",
    namespaced,
    status = "CellStatus",
    printcolumn = r#"{"name":"Prometheus","type":"string","jsonPath":".status.prometheusReady.status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct CellSpec {
    /// Value of the `cluster` external label attached to every series.
    #[serde(rename = "cluster_name", default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    /// Namespace hosting the workloads scraped by this cell.
    #[serde(rename = "gitpodNamespace", default, skip_serializing_if = "String::is_empty")]
    pub gitpod_namespace: String,
    #[serde(default)]
    pub metrics: MetricsSpec,
    #[serde(default)]
    pub logs: LogsSpec,
    #[serde(default)]
    pub traces: TracesSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    /// Remote-write targets receiving the allow-listed series.
    #[serde(rename = "upstreamRemoteWrite", default)]
    pub upstream_remote_writes: Vec<RemoteWriteSpec>,
    /// Metric names dropped at scrape time by every exporter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_list: Vec<String>,
    /// Metric names kept when forwarding upstream. Empty forwards everything.
    #[serde(rename = "upstreamAllowList", default, skip_serializing_if = "Vec::is_empty")]
    pub upstream_allow_list: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct LogsSpec {}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct TracesSpec {}

/// Readiness of a workload owned by the cell (operator, Prometheus).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum WorkloadStatus {
    #[default]
    Unknown,
    Reconciling,
    Ready,
}

/// Readiness of a scrape target, confirmed through a live query.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ExporterStatus {
    #[default]
    Reconciling,
    Unknown,
    MetricNotFound,
    Ready,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub status: WorkloadStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExporterRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub status: ExporterStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CellStatus {
    #[serde(default)]
    pub prometheus_operator_ready: WorkloadRecord,
    #[serde(default)]
    pub prometheus_ready: WorkloadRecord,
    #[serde(default)]
    pub node_exporter_ready: ExporterRecord,
    #[serde(default)]
    pub kube_state_metrics_ready: ExporterRecord,
    #[serde(default)]
    pub kubelet_ready: ExporterRecord,
    #[serde(rename = "apiServerReady", default)]
    pub api_server_ready: ExporterRecord,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn spec_uses_wire_field_names() {
        let spec: CellSpec = serde_json::from_value(serde_json::json!({
            "cluster_name": "eu01",
            "gitpodNamespace": "workspaces",
            "metrics": {
                "upstreamRemoteWrite": [{"url": "https://victoria.example/api/v1/write"}],
                "dropList": ["apiserver_request_duration_seconds_bucket"],
                "upstreamAllowList": ["up"]
            }
        }))
        .unwrap();
        assert_eq!(spec.cluster_name, "eu01");
        assert_eq!(spec.gitpod_namespace, "workspaces");
        assert_eq!(spec.metrics.upstream_remote_writes.len(), 1);
        assert_eq!(spec.metrics.drop_list, vec!["apiserver_request_duration_seconds_bucket"]);
        assert_eq!(spec.metrics.upstream_allow_list, vec!["up"]);
    }

    #[test]
    fn status_serializes_camel_case_records() {
        let mut status = CellStatus::default();
        status.node_exporter_ready.status = ExporterStatus::MetricNotFound;
        status.api_server_ready.message = "waiting".into();
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["nodeExporterReady"]["status"], "MetricNotFound");
        assert_eq!(v["apiServerReady"]["message"], "waiting");
        assert_eq!(v["prometheusOperatorReady"]["status"], "Unknown");
    }

    #[test]
    fn crd_has_status_subresource() {
        let crd = Cell::crd();
        assert_eq!(crd.spec.group, CELL_GROUP);
        assert_eq!(crd.spec.names.kind, CELL_KIND);
        let version = &crd.spec.versions[0];
        assert_eq!(version.name, CELL_VERSION);
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
