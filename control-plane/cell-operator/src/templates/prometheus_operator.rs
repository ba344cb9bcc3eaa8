use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSecurityContext, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecurityContext, Service, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;

use super::labels::{component_labels, selector_labels};
use super::rbac::{self, rule};
use super::rbac_proxy::{self, Listen};
use super::{
    TemplateError, cell_namespace, match_labels, owned_meta, secure_endpoint,
    service_port,
};
use crate::crd::Cell;
use crate::crd::monitoring::{ServiceMonitor, ServiceMonitorSpec};

pub const COMPONENT: &str = "prometheus-operator";
pub const VERSION: &str = "v0.58.0";
pub const IMAGE: &str = "quay.io/prometheus-operator/prometheus-operator";
pub const RELOADER_IMAGE: &str = "quay.io/prometheus-operator/prometheus-config-reloader";

const HTTP_PORT: i32 = 8080;
const HTTPS_PORT: i32 = 8443;

pub fn name(cell: &Cell) -> String {
    format!("{COMPONENT}-{}", cell.name_any())
}

pub fn cluster_role(cell: &Cell) -> Result<ClusterRole, TemplateError> {
    let mut rules = vec![
        rule(
            &["monitoring.coreos.com"],
            &[
                "alertmanagers",
                "alertmanagers/finalizers",
                "alertmanagerconfigs",
                "prometheuses",
                "prometheuses/finalizers",
                "prometheuses/status",
                "thanosrulers",
                "thanosrulers/finalizers",
                "servicemonitors",
                "podmonitors",
                "probes",
                "prometheusrules",
            ],
            &["*"],
        ),
        rule(&["apps"], &["statefulsets"], &["*"]),
        rule(&[""], &["configmaps", "secrets"], &["*"]),
        rule(&[""], &["pods"], &["list", "delete"]),
        rule(
            &[""],
            &["services", "services/finalizers", "endpoints"],
            &["get", "create", "update", "delete"],
        ),
        rule(&[""], &["nodes"], &["list", "watch"]),
        rule(&[""], &["namespaces"], &["get", "list", "watch"]),
        rule(&["networking.k8s.io"], &["ingresses"], &["get", "list", "watch"]),
    ];
    rules.extend(rbac::auth_delegation_rules());
    rbac::cluster_role(cell, &name(cell), component_labels(cell, COMPONENT), rules)
}

pub fn cluster_role_binding(cell: &Cell) -> Result<ClusterRoleBinding, TemplateError> {
    rbac::cluster_role_binding(cell, &name(cell), component_labels(cell, COMPONENT))
}

pub fn service_account(cell: &Cell) -> Result<ServiceAccount, TemplateError> {
    rbac::service_account(cell, &name(cell), component_labels(cell, COMPONENT))
}

pub fn service(cell: &Cell) -> Result<Service, TemplateError> {
    super::service(
        cell,
        &name(cell),
        cell_namespace(cell)?,
        component_labels(cell, COMPONENT),
        selector_labels(cell, COMPONENT),
        vec![service_port("https", HTTPS_PORT, "https")],
        true,
    )
}

pub fn deployment(cell: &Cell) -> Result<Deployment, TemplateError> {
    let selector = selector_labels(cell, COMPONENT);
    let mut pod_labels = component_labels(cell, COMPONENT);
    pod_labels.extend(selector.clone());

    let operator = Container {
        name: COMPONENT.into(),
        image: Some(format!("{IMAGE}:{VERSION}")),
        args: Some(vec![
            "--kubelet-service=kube-system/kubelet".into(),
            format!("--prometheus-config-reloader={RELOADER_IMAGE}:{VERSION}"),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("http".into()),
            container_port: HTTP_PORT,
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".into())),
                ("memory".to_string(), Quantity("100Mi".into())),
            ])),
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("200m".into())),
                ("memory".to_string(), Quantity("200Mi".into())),
            ])),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };
    let proxy = rbac_proxy::sidecar("kube-rbac-proxy", "https", HTTPS_PORT, HTTP_PORT, Listen::AnyAddress);

    Ok(Deployment {
        metadata: owned_meta(
            cell,
            name(cell),
            Some(cell_namespace(cell)?),
            component_labels(cell, COMPONENT),
        )?,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: match_labels(selector),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: Some(BTreeMap::from([(
                        "kubectl.kubernetes.io/default-container".to_string(),
                        COMPONENT.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(name(cell)),
                    automount_service_account_token: Some(true),
                    node_selector: Some(BTreeMap::from([(
                        "kubernetes.io/os".to_string(),
                        "linux".to_string(),
                    )])),
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        run_as_user: Some(65534),
                        ..Default::default()
                    }),
                    containers: vec![operator, proxy],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn service_monitor(cell: &Cell) -> Result<ServiceMonitor, TemplateError> {
    super::service_monitor(
        cell,
        &name(cell),
        cell_namespace(cell)?,
        component_labels(cell, COMPONENT),
        ServiceMonitorSpec {
            endpoints: vec![secure_endpoint("https", "60s")],
            selector: match_labels(selector_labels(cell, COMPONENT)),
            ..Default::default()
        },
    )
}
