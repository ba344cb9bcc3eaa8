//! Scrape surface for the Gitpod workloads: per target a NetworkPolicy
//! admitting the cell's Prometheus, a metrics Service and a ServiceMonitor.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec,
};

use super::labels::{COMPONENT, NAME, PART_OF, PART_OF_VALUE};
use super::{
    SERVICE_ACCOUNT_TOKEN, TemplateError, cell_namespace, drop_relabelings, match_labels,
    owned_meta, prometheus, service_port,
};
use crate::crd::Cell;
use crate::crd::monitoring::{Endpoint, NamespaceSelector, ServiceMonitor, ServiceMonitorSpec};

pub const APP: &str = "gitpod";

/// One scraped workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub name: &'static str,
    /// Labels selecting the workload's pods for the network policy.
    pub policy_selector: (&'static str, &'static str),
    /// Labels selecting the workload's pods for the metrics service.
    pub service_selector: (&'static str, &'static str),
    pub port_name: &'static str,
    pub port: i32,
}

const fn component(name: &'static str) -> Target {
    Target {
        name,
        policy_selector: ("component", name),
        service_selector: ("component", name),
        port_name: "metrics",
        port: 9500,
    }
}

/// Registered workloads, in convergence order.
pub const TARGETS: &[Target] = &[
    component("agent-smith"),
    component("blobserve"),
    component("containerd-metrics"),
    component("content-service"),
    component("ide-metrics"),
    component("ide-service"),
    component("image-builder-mk3"),
    component("openvsx-proxy"),
    component("public-api-server"),
    component("registry-facade"),
    component("server"),
    component("slow-server"),
    component("usage"),
    component("ws-daemon"),
    component("ws-manager-bridge"),
    component("ws-manager"),
    component("ws-proxy"),
    component("ws-scheduler"),
    Target {
        name: "messagebus",
        policy_selector: ("component", "messagebus"),
        service_selector: (NAME, "rabbitmq"),
        port_name: "metrics",
        port: 9419,
    },
    Target {
        name: "proxy-caddy",
        policy_selector: ("component", "proxy"),
        service_selector: ("component", "proxy"),
        port_name: "caddy-metrics",
        port: 8003,
    },
];

pub fn labels(target: &Target) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT.to_string(), target.name.to_string()),
        (NAME.to_string(), APP.to_string()),
        (PART_OF.to_string(), PART_OF_VALUE.to_string()),
    ])
}

pub fn service_name(target: &Target) -> String {
    format!("{APP}-{}", target.name)
}

pub fn network_policy_name(target: &Target) -> String {
    format!("{}-allow-prometheus", target.name)
}

fn selector((k, v): (&str, &str)) -> BTreeMap<String, String> {
    BTreeMap::from([(k.to_string(), v.to_string())])
}

pub fn network_policy(cell: &Cell, target: &Target) -> Result<NetworkPolicy, TemplateError> {
    Ok(NetworkPolicy {
        metadata: owned_meta(
            cell,
            network_policy_name(target),
            Some(cell.spec.gitpod_namespace.clone()),
            labels(target),
        )?,
        spec: Some(NetworkPolicySpec {
            pod_selector: Some(match_labels(selector(target.policy_selector))),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(match_labels(BTreeMap::from([(
                        "kubernetes.io/metadata.name".to_string(),
                        cell_namespace(cell)?,
                    )]))),
                    pod_selector: Some(match_labels(prometheus::pod_labels(cell))),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            policy_types: Some(vec!["Ingress".into()]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn service(cell: &Cell, target: &Target) -> Result<Service, TemplateError> {
    super::service(
        cell,
        &service_name(target),
        cell.spec.gitpod_namespace.clone(),
        labels(target),
        selector(target.service_selector),
        vec![service_port(target.port_name, target.port, target.port_name)],
        false,
    )
}

pub fn service_monitor(cell: &Cell, target: &Target) -> Result<ServiceMonitor, TemplateError> {
    super::service_monitor(
        cell,
        &service_name(target),
        cell_namespace(cell)?,
        labels(target),
        ServiceMonitorSpec {
            job_label: Some(COMPONENT.into()),
            endpoints: vec![Endpoint {
                port: Some(target.port_name.into()),
                interval: Some("60s".into()),
                bearer_token_file: Some(SERVICE_ACCOUNT_TOKEN.into()),
                metric_relabelings: drop_relabelings(cell),
                ..Default::default()
            }],
            selector: match_labels(labels(target)),
            namespace_selector: Some(NamespaceSelector {
                match_names: vec![cell.spec.gitpod_namespace.clone()],
                ..Default::default()
            }),
        },
    )
}
