//! Service monitors for the control plane endpoints every cluster has.

use std::collections::BTreeMap;

use kube::ResourceExt;

use super::labels::{NAME, component_labels};
use super::{
    SERVICE_ACCOUNT_CA, SERVICE_ACCOUNT_TOKEN, TemplateError, drop_relabelings,
    match_labels, secure_endpoint,
};
use crate::crd::Cell;
use crate::crd::monitoring::{
    Endpoint, NamespaceSelector, RelabelConfig, ServiceMonitor, ServiceMonitorSpec,
    TlsConfig,
};

pub const KUBELET: &str = "kubelet";
pub const APISERVER: &str = "apiserver";

pub const KUBELET_NAMESPACE: &str = "kube-system";
pub const APISERVER_NAMESPACE: &str = "default";

pub fn kubelet_name(cell: &Cell) -> String {
    format!("{KUBELET}-{}", cell.name_any())
}

pub fn apiserver_name(cell: &Cell) -> String {
    format!("{APISERVER}-{}", cell.name_any())
}

fn metrics_path_label() -> RelabelConfig {
    RelabelConfig {
        source_labels: Some(vec!["__metrics_path__".into()]),
        target_label: Some("metrics_path".into()),
        ..Default::default()
    }
}

/// Kubelet scrape, three paths on the `https-metrics` port of the kubelet
/// service the Prometheus Operator maintains.
pub fn kubelet(cell: &Cell) -> Result<ServiceMonitor, TemplateError> {
    let drop = drop_relabelings(cell);
    let endpoint = |path: &str, interval: &str| {
        let mut e = secure_endpoint("https-metrics", interval);
        e.path = Some(path.into());
        e.honor_labels = Some(true);
        e.relabelings = Some(vec![metrics_path_label()]);
        e.metric_relabelings = drop.clone();
        e
    };
    super::service_monitor(
        cell,
        &kubelet_name(cell),
        KUBELET_NAMESPACE.into(),
        component_labels(cell, KUBELET),
        ServiceMonitorSpec {
            job_label: Some(NAME.into()),
            endpoints: vec![
                endpoint("/metrics", "30s"),
                endpoint("/metrics/cadvisor", "30s"),
                endpoint("/metrics/probes", "30s"),
            ],
            selector: match_labels(BTreeMap::from([(NAME.to_string(), KUBELET.to_string())])),
            namespace_selector: Some(NamespaceSelector {
                match_names: vec![KUBELET_NAMESPACE.into()],
                ..Default::default()
            }),
        },
    )
}

/// API server scrape through the `kubernetes` service in `default`.
pub fn apiserver(cell: &Cell) -> Result<ServiceMonitor, TemplateError> {
    super::service_monitor(
        cell,
        &apiserver_name(cell),
        APISERVER_NAMESPACE.into(),
        component_labels(cell, APISERVER),
        ServiceMonitorSpec {
            job_label: Some("component".into()),
            endpoints: vec![Endpoint {
                port: Some("https".into()),
                scheme: Some("https".into()),
                interval: Some("30s".into()),
                bearer_token_file: Some(SERVICE_ACCOUNT_TOKEN.into()),
                tls_config: Some(TlsConfig {
                    ca_file: Some(SERVICE_ACCOUNT_CA.into()),
                    server_name: Some("kubernetes".into()),
                    ..Default::default()
                }),
                metric_relabelings: drop_relabelings(cell),
                ..Default::default()
            }],
            selector: match_labels(BTreeMap::from([
                ("component".to_string(), APISERVER.to_string()),
                ("provider".to_string(), "kubernetes".to_string()),
            ])),
            namespace_selector: Some(NamespaceSelector {
                match_names: vec![APISERVER_NAMESPACE.into()],
                ..Default::default()
            }),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::test_support::cell;

    #[test]
    fn kubelet_scrapes_three_paths_in_kube_system() {
        let c = cell("demo", "monitoring", "workspaces");
        let sm = kubelet(&c).unwrap();
        assert_eq!(sm.metadata.name.as_deref(), Some("kubelet-demo"));
        assert_eq!(sm.metadata.namespace.as_deref(), Some("kube-system"));
        let paths: Vec<_> = sm.spec.endpoints.iter().filter_map(|e| e.path.clone()).collect();
        assert_eq!(paths, vec!["/metrics", "/metrics/cadvisor", "/metrics/probes"]);
    }

    #[test]
    fn apiserver_job_label_is_component() {
        let c = cell("demo", "monitoring", "workspaces");
        let sm = apiserver(&c).unwrap();
        assert_eq!(sm.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(sm.spec.job_label.as_deref(), Some("component"));
    }
}
