//! Pure builders turning a [`Cell`] into the objects it owns.
//!
//! Nothing here talks to the cluster. Every builder returns freshly
//! allocated objects; label maps are never shared between calls.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, ObjectMeta, OwnerReference,
};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

use crate::crd::Cell;
use crate::crd::cell::{CELL_API_VERSION, CELL_KIND};
use crate::crd::monitoring::{
    Endpoint, RelabelConfig, ServiceMonitor, ServiceMonitorSpec, TlsConfig,
};

pub mod gitpod;
pub mod kube_state_metrics;
pub mod kubernetes;
pub mod labels;
pub mod node_exporter;
pub mod prometheus;
pub mod prometheus_operator;
pub mod rbac;
pub mod rbac_proxy;

pub const SERVICE_ACCOUNT_TOKEN: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/token";
pub const SERVICE_ACCOUNT_CA: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("cell {0} has no namespace")]
    MissingNamespace(String),
    #[error("cell {0} has no uid; it must be read from the API server")]
    MissingUid(String),
}

/// Namespace of the cell; every namespaced child defaults to it.
pub fn cell_namespace(cell: &Cell) -> Result<String, TemplateError> {
    cell.namespace()
        .ok_or_else(|| TemplateError::MissingNamespace(cell.name_any()))
}

/// The single controller reference every owned object carries.
pub fn owner_ref(cell: &Cell) -> Result<OwnerReference, TemplateError> {
    let uid = cell
        .metadata
        .uid
        .clone()
        .ok_or_else(|| TemplateError::MissingUid(cell.name_any()))?;
    Ok(OwnerReference {
        api_version: CELL_API_VERSION.to_string(),
        kind: CELL_KIND.to_string(),
        name: cell.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: None,
    })
}

/// Metadata for an owned object. `namespace` is `None` for cluster-scoped kinds.
pub fn owned_meta(
    cell: &Cell,
    name: impl Into<String>,
    namespace: Option<String>,
    labels: BTreeMap<String, String>,
) -> Result<ObjectMeta, TemplateError> {
    Ok(ObjectMeta {
        name: Some(name.into()),
        namespace,
        labels: Some(labels),
        owner_references: Some(vec![owner_ref(cell)?]),
        ..Default::default()
    })
}

pub fn match_labels(labels: BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels),
        ..Default::default()
    }
}

/// Drop rule for the cell's metric drop list, if any.
pub fn drop_relabelings(cell: &Cell) -> Option<Vec<RelabelConfig>> {
    name_filter(&cell.spec.metrics.drop_list, "drop")
}

/// `__name__` filter with the given action over an alternation of names.
pub fn name_filter(names: &[String], action: &str) -> Option<Vec<RelabelConfig>> {
    if names.is_empty() {
        return None;
    }
    Some(vec![RelabelConfig {
        source_labels: Some(vec!["__name__".into()]),
        regex: Some(format!("({})", names.join("|"))),
        action: Some(action.into()),
        ..Default::default()
    }])
}

pub fn service_port(name: &str, port: i32, target: &str) -> ServicePort {
    ServicePort {
        name: Some(name.into()),
        port,
        target_port: Some(IntOrString::String(target.into())),
        ..Default::default()
    }
}

/// A Service selecting `selector` in `namespace`. Headless services get
/// `clusterIP: None`.
pub fn service(
    cell: &Cell,
    name: &str,
    namespace: String,
    labels: BTreeMap<String, String>,
    selector: BTreeMap<String, String>,
    ports: Vec<ServicePort>,
    headless: bool,
) -> Result<Service, TemplateError> {
    Ok(Service {
        metadata: owned_meta(cell, name, Some(namespace), labels)?,
        spec: Some(ServiceSpec {
            cluster_ip: headless.then(|| "None".to_string()),
            selector: Some(selector),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn service_monitor(
    cell: &Cell,
    name: &str,
    namespace: String,
    labels: BTreeMap<String, String>,
    spec: ServiceMonitorSpec,
) -> Result<ServiceMonitor, TemplateError> {
    Ok(ServiceMonitor {
        metadata: owned_meta(cell, name, Some(namespace), labels)?,
        spec,
    })
}

/// Endpoint scraped over TLS with the Prometheus service account token.
pub fn secure_endpoint(port: &str, interval: &str) -> Endpoint {
    Endpoint {
        port: Some(port.into()),
        scheme: Some("https".into()),
        interval: Some(interval.into()),
        bearer_token_file: Some(SERVICE_ACCOUNT_TOKEN.into()),
        tls_config: Some(TlsConfig {
            insecure_skip_verify: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}
