use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, HostPathVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec,
    SecurityContext, Service, ServiceAccount, Toleration, Volume, VolumeMount,
};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::labels::{NAME, component_labels, selector_labels};
use super::rbac;
use super::rbac_proxy::{self, Listen};
use super::{
    TemplateError, cell_namespace, drop_relabelings, match_labels, owned_meta,
    secure_endpoint, service_port,
};
use crate::crd::Cell;
use crate::crd::monitoring::{RelabelConfig, ServiceMonitor, ServiceMonitorSpec};

pub const COMPONENT: &str = "node-exporter";
pub const VERSION: &str = "v1.3.1";
pub const IMAGE: &str = "quay.io/prometheus/node-exporter";

const PORT: i32 = 9100;

pub fn name(cell: &Cell) -> String {
    format!("{COMPONENT}-{}", cell.name_any())
}

pub fn cluster_role(cell: &Cell) -> Result<ClusterRole, TemplateError> {
    rbac::cluster_role(
        cell,
        &name(cell),
        component_labels(cell, COMPONENT),
        rbac::auth_delegation_rules(),
    )
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
        vec![service_port("https", PORT, "https")],
        true,
    )
}

fn host_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.into(),
        host_path: Some(HostPathVolumeSource {
            path: path.into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn read_only_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        read_only: Some(true),
        mount_propagation: Some("HostToContainer".into()),
        ..Default::default()
    }
}

pub fn daemon_set(cell: &Cell) -> Result<DaemonSet, TemplateError> {
    let selector = selector_labels(cell, COMPONENT);
    let exporter = Container {
        name: COMPONENT.into(),
        image: Some(format!("{IMAGE}:{VERSION}")),
        args: Some(vec![
            format!("--web.listen-address=127.0.0.1:{PORT}"),
            "--path.sysfs=/host/sys".into(),
            "--path.rootfs=/host/root".into(),
            "--path.udev.data=/host/root/run/udev/data".into(),
            "--no-collector.wifi".into(),
            "--no-collector.hwmon".into(),
            "--collector.filesystem.mount-points-exclude=^/(dev|proc|sys|run/k3s/containerd/.+|var/lib/docker/.+|var/lib/kubelet/pods/.+)($|/)".into(),
        ]),
        volume_mounts: Some(vec![
            read_only_mount("sys", "/host/sys"),
            read_only_mount("root", "/host/root"),
        ]),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };
    let proxy = rbac_proxy::sidecar("kube-rbac-proxy", "https", PORT, PORT, Listen::PodIp);

    Ok(DaemonSet {
        metadata: owned_meta(
            cell,
            name(cell),
            Some(cell_namespace(cell)?),
            component_labels(cell, COMPONENT),
        )?,
        spec: Some(DaemonSetSpec {
            selector: match_labels(selector),
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
                    host_network: Some(true),
                    host_pid: Some(true),
                    priority_class_name: Some("system-cluster-critical".into()),
                    node_selector: Some(BTreeMap::from([(
                        "kubernetes.io/os".to_string(),
                        "linux".to_string(),
                    )])),
                    tolerations: Some(vec![Toleration {
                        operator: Some("Exists".into()),
                        ..Default::default()
                    }]),
                    security_context: Some(PodSecurityContext {
                        run_as_non_root: Some(true),
                        run_as_user: Some(65534),
                        run_as_group: Some(65534),
                        ..Default::default()
                    }),
                    volumes: Some(vec![host_volume("sys", "/sys"), host_volume("root", "/")]),
                    containers: vec![exporter, proxy],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

pub fn service_monitor(cell: &Cell) -> Result<ServiceMonitor, TemplateError> {
    let mut endpoint = secure_endpoint("https", "15s");
    endpoint.relabelings = Some(vec![
        RelabelConfig {
            source_labels: Some(vec!["__meta_kubernetes_pod_node_name".into()]),
            target_label: Some("instance".into()),
            action: Some("replace".into()),
            regex: Some("(.*)".into()),
            replacement: Some("$1".into()),
            ..Default::default()
        },
        RelabelConfig {
            source_labels: Some(vec!["__meta_kubernetes_pod_node_name".into()]),
            target_label: Some("node".into()),
            action: Some("replace".into()),
            regex: Some("(.*)".into()),
            replacement: Some("$1".into()),
            ..Default::default()
        },
    ]);
    endpoint.metric_relabelings = drop_relabelings(cell);
    super::service_monitor(
        cell,
        &name(cell),
        cell_namespace(cell)?,
        component_labels(cell, COMPONENT),
        ServiceMonitorSpec {
            job_label: Some(NAME.into()),
            endpoints: vec![endpoint],
            selector: match_labels(selector_labels(cell, COMPONENT)),
            ..Default::default()
        },
    )
}
