use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, PodSecurityContext, PodSpec, PodTemplateSpec, SecurityContext, Service,
    ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::labels::{NAME, component_labels, selector_labels};
use super::rbac::{self, rule};
use super::rbac_proxy::{self, Listen};
use super::{
    TemplateError, cell_namespace, drop_relabelings, match_labels, owned_meta,
    secure_endpoint, service_port,
};
use crate::crd::Cell;
use crate::crd::monitoring::{RelabelConfig, ServiceMonitor, ServiceMonitorSpec};

pub const COMPONENT: &str = "kube-state-metrics";
pub const VERSION: &str = "v2.5.0";
pub const IMAGE: &str = "k8s.gcr.io/kube-state-metrics/kube-state-metrics";

const MAIN_PORT: i32 = 8443;
const SELF_PORT: i32 = 9443;
const UPSTREAM_MAIN: i32 = 8081;
const UPSTREAM_SELF: i32 = 8082;

pub fn name(cell: &Cell) -> String {
    format!("{COMPONENT}-{}", cell.name_any())
}

const LIST_WATCH: &[&str] = &["list", "watch"];

pub fn cluster_role(cell: &Cell) -> Result<ClusterRole, TemplateError> {
    let mut rules = vec![
        rule(
            &[""],
            &[
                "configmaps",
                "secrets",
                "nodes",
                "pods",
                "services",
                "serviceaccounts",
                "resourcequotas",
                "replicationcontrollers",
                "limitranges",
                "persistentvolumeclaims",
                "persistentvolumes",
                "namespaces",
                "endpoints",
            ],
            LIST_WATCH,
        ),
        rule(&["apps"], &["statefulsets", "daemonsets", "deployments", "replicasets"], LIST_WATCH),
        rule(&["batch"], &["cronjobs", "jobs"], LIST_WATCH),
        rule(&["autoscaling"], &["horizontalpodautoscalers"], LIST_WATCH),
        rule(&["policy"], &["poddisruptionbudgets"], LIST_WATCH),
        rule(&["certificates.k8s.io"], &["certificatesigningrequests"], LIST_WATCH),
        rule(&["storage.k8s.io"], &["storageclasses", "volumeattachments"], LIST_WATCH),
        rule(
            &["admissionregistration.k8s.io"],
            &["mutatingwebhookconfigurations", "validatingwebhookconfigurations"],
            LIST_WATCH,
        ),
        rule(&["networking.k8s.io"], &["networkpolicies", "ingresses"], LIST_WATCH),
        rule(&["coordination.k8s.io"], &["leases"], LIST_WATCH),
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
        vec![
            service_port("https-main", MAIN_PORT, "https-main"),
            service_port("https-self", SELF_PORT, "https-self"),
        ],
        true,
    )
}

pub fn deployment(cell: &Cell) -> Result<Deployment, TemplateError> {
    let metrics = Container {
        name: COMPONENT.into(),
        image: Some(format!("{IMAGE}:{VERSION}")),
        args: Some(vec![
            "--host=127.0.0.1".into(),
            format!("--port={UPSTREAM_MAIN}"),
            "--telemetry-host=127.0.0.1".into(),
            format!("--telemetry-port={UPSTREAM_SELF}"),
        ]),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            run_as_user: Some(65534),
            ..Default::default()
        }),
        ..Default::default()
    };

    Ok(Deployment {
        metadata: owned_meta(
            cell,
            name(cell),
            Some(cell_namespace(cell)?),
            component_labels(cell, COMPONENT),
        )?,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: match_labels(selector_labels(cell, COMPONENT)),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(component_labels(cell, COMPONENT)),
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
                        ..Default::default()
                    }),
                    containers: vec![
                        metrics,
                        rbac_proxy::sidecar("kube-rbac-proxy-main", "https-main", MAIN_PORT, UPSTREAM_MAIN, Listen::AnyAddress),
                        rbac_proxy::sidecar("kube-rbac-proxy-self", "https-self", SELF_PORT, UPSTREAM_SELF, Listen::AnyAddress),
                    ],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn service_monitor(cell: &Cell) -> Result<ServiceMonitor, TemplateError> {
    let mut main = secure_endpoint("https-main", "30s");
    main.honor_labels = Some(true);
    main.relabelings = Some(vec![RelabelConfig {
        regex: Some("(pod|service|endpoint|namespace)".into()),
        action: Some("labeldrop".into()),
        ..Default::default()
    }]);
    main.metric_relabelings = drop_relabelings(cell);
    let mut own = secure_endpoint("https-self", "30s");
    own.metric_relabelings = drop_relabelings(cell);

    super::service_monitor(
        cell,
        &name(cell),
        cell_namespace(cell)?,
        component_labels(cell, COMPONENT),
        ServiceMonitorSpec {
            job_label: Some(NAME.into()),
            endpoints: vec![main, own],
            selector: match_labels(selector_labels(cell, COMPONENT)),
            ..Default::default()
        },
    )
}
