use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PodSecurityContext, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;

use super::labels::{self, COMPONENT as COMPONENT_LABEL, NAME, PART_OF, PART_OF_VALUE, component_labels, selector_labels};
use super::rbac::{self, non_resource_rule, rule};
use super::{TemplateError, cell_namespace, match_labels, name_filter, owned_meta, service_port};
use crate::crd::Cell;
use crate::crd::monitoring::{
    EmbeddedObjectMetadata, Endpoint, Prometheus, PrometheusSpec, RemoteWriteSpec,
    ServiceMonitor, ServiceMonitorSpec,
};

pub const COMPONENT: &str = "prometheus";
pub const VERSION: &str = "v2.37.0";
pub const IMAGE: &str = "quay.io/prometheus/prometheus";

pub const WEB_PORT: i32 = 9090;
const RELOADER_PORT: i32 = 8080;

pub fn name(cell: &Cell) -> String {
    format!("{COMPONENT}-{}", cell.name_any())
}

pub fn config_name(cell: &Cell) -> String {
    format!("{}-config", name(cell))
}

/// Name of the first pod of the StatefulSet the Prometheus Operator
/// creates for this cell's Prometheus.
pub fn pod_name(cell: &Cell) -> String {
    format!("prometheus-{}-0", name(cell))
}

/// Labels carried by the Prometheus pods. Network policies in the
/// scraped namespace admit traffic from pods matching these.
pub fn pod_labels(cell: &Cell) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMPONENT_LABEL.to_string(), COMPONENT.to_string()),
        (NAME.to_string(), COMPONENT.to_string()),
        (PART_OF.to_string(), PART_OF_VALUE.to_string()),
        (labels::INSTANCE.to_string(), cell.name_any()),
    ])
}

/// Namespaces Prometheus needs read access to for service discovery,
/// cell namespace first, without duplicates.
pub fn scrape_namespaces(cell: &Cell) -> Result<Vec<String>, TemplateError> {
    let mut namespaces = vec![cell_namespace(cell)?];
    for ns in ["default", "kube-system", cell.spec.gitpod_namespace.as_str()] {
        if !ns.is_empty() && !namespaces.iter().any(|n| n == ns) {
            namespaces.push(ns.to_string());
        }
    }
    Ok(namespaces)
}

pub fn cluster_role(cell: &Cell) -> Result<ClusterRole, TemplateError> {
    rbac::cluster_role(
        cell,
        &name(cell),
        component_labels(cell, COMPONENT),
        vec![
            rule(&[""], &["nodes/metrics"], &["get"]),
            rule(&[""], &["services", "endpoints", "pods"], &["get", "list", "watch"]),
            non_resource_rule(&["/metrics", "/metrics/cadvisor", "/metrics/probes"], &["get"]),
        ],
    )
}

pub fn cluster_role_binding(cell: &Cell) -> Result<ClusterRoleBinding, TemplateError> {
    rbac::cluster_role_binding(cell, &name(cell), component_labels(cell, COMPONENT))
}

pub fn roles(cell: &Cell) -> Result<Vec<Role>, TemplateError> {
    let mut roles = Vec::new();
    for ns in scrape_namespaces(cell)? {
        roles.push(rbac::role(
            cell,
            &name(cell),
            &ns,
            component_labels(cell, COMPONENT),
            vec![
                rule(&[""], &["services", "endpoints", "pods"], &["get", "list", "watch"]),
                rule(&["extensions", "networking.k8s.io"], &["ingresses"], &["get", "list", "watch"]),
            ],
        )?);
    }
    roles.push(rbac::role(
        cell,
        &config_name(cell),
        &cell_namespace(cell)?,
        component_labels(cell, COMPONENT),
        vec![rule(&[""], &["configmaps"], &["get"])],
    )?);
    Ok(roles)
}

pub fn role_bindings(cell: &Cell) -> Result<Vec<RoleBinding>, TemplateError> {
    let sa = name(cell);
    let mut bindings = Vec::new();
    for ns in scrape_namespaces(cell)? {
        bindings.push(rbac::role_binding(
            cell,
            &sa,
            &ns,
            &sa,
            &sa,
            component_labels(cell, COMPONENT),
        )?);
    }
    let config = config_name(cell);
    bindings.push(rbac::role_binding(
        cell,
        &config,
        &cell_namespace(cell)?,
        &config,
        &sa,
        component_labels(cell, COMPONENT),
    )?);
    Ok(bindings)
}

pub fn service_account(cell: &Cell) -> Result<ServiceAccount, TemplateError> {
    rbac::service_account(cell, &name(cell), component_labels(cell, COMPONENT))
}

pub fn service(cell: &Cell) -> Result<Service, TemplateError> {
    let mut svc = super::service(
        cell,
        &name(cell),
        cell_namespace(cell)?,
        component_labels(cell, COMPONENT),
        BTreeMap::from([
            (NAME.to_string(), COMPONENT.to_string()),
            ("prometheus".to_string(), name(cell)),
        ]),
        vec![
            service_port("web", WEB_PORT, "web"),
            service_port("reloader-web", RELOADER_PORT, "reloader-web"),
        ],
        false,
    )?;
    if let Some(spec) = svc.spec.as_mut() {
        spec.session_affinity = Some("ClientIP".into());
    }
    Ok(svc)
}

pub fn service_monitor(cell: &Cell) -> Result<ServiceMonitor, TemplateError> {
    let endpoint = |port: &str| Endpoint {
        port: Some(port.into()),
        interval: Some("60s".into()),
        ..Default::default()
    };
    super::service_monitor(
        cell,
        &name(cell),
        cell_namespace(cell)?,
        component_labels(cell, COMPONENT),
        ServiceMonitorSpec {
            endpoints: vec![endpoint("web"), endpoint("reloader-web")],
            selector: match_labels(selector_labels(cell, COMPONENT)),
            ..Default::default()
        },
    )
}

/// Upstream remote writes, restricted to the allow list when one is set.
pub fn remote_writes(cell: &Cell) -> Vec<RemoteWriteSpec> {
    let keep = name_filter(&cell.spec.metrics.upstream_allow_list, "keep");
    cell.spec
        .metrics
        .upstream_remote_writes
        .iter()
        .map(|rw| {
            let mut rw = rw.clone();
            if let Some(keep) = keep.clone() {
                rw.write_relabel_configs.get_or_insert_with(Vec::new).extend(keep);
            }
            rw
        })
        .collect()
}

pub fn prometheus(cell: &Cell) -> Result<Prometheus, TemplateError> {
    let any = || Some(LabelSelector::default());
    let remote_write = remote_writes(cell);
    Ok(Prometheus {
        metadata: owned_meta(
            cell,
            name(cell),
            Some(cell_namespace(cell)?),
            component_labels(cell, COMPONENT),
        )?,
        spec: PrometheusSpec {
            replicas: Some(1),
            version: Some(VERSION.into()),
            image: Some(format!("{IMAGE}:{VERSION}")),
            service_account_name: Some(name(cell)),
            pod_metadata: Some(EmbeddedObjectMetadata {
                labels: Some(pod_labels(cell)),
            }),
            external_labels: Some(BTreeMap::from([(
                "cluster".to_string(),
                cell.spec.cluster_name.clone(),
            )])),
            enable_features: Some(vec!["remote-write-receiver".into()]),
            remote_write: (!remote_write.is_empty()).then_some(remote_write),
            service_monitor_selector: any(),
            service_monitor_namespace_selector: any(),
            pod_monitor_selector: any(),
            pod_monitor_namespace_selector: any(),
            probe_selector: any(),
            probe_namespace_selector: any(),
            rule_selector: any(),
            rule_namespace_selector: any(),
            security_context: Some(PodSecurityContext {
                fs_group: Some(2000),
                run_as_non_root: Some(true),
                run_as_user: Some(1000),
                ..Default::default()
            }),
        },
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::monitoring::RemoteWriteSpec;
    use crate::templates::test_support::cell;

    #[test]
    fn external_label_carries_cluster_name() {
        let c = cell("demo", "monitoring", "workspaces");
        let p = prometheus(&c).unwrap();
        assert_eq!(
            p.spec.external_labels.unwrap().get("cluster").map(String::as_str),
            Some("eu01")
        );
        assert_eq!(p.spec.service_account_name.as_deref(), Some("prometheus-demo"));
        assert!(p.spec.remote_write.is_none());
    }

    #[test]
    fn pod_name_follows_operator_statefulset_naming() {
        let c = cell("demo", "monitoring", "workspaces");
        assert_eq!(pod_name(&c), "prometheus-prometheus-demo-0");
    }

    #[test]
    fn roles_cover_each_scrape_namespace_once() {
        let c = cell("demo", "monitoring", "workspaces");
        let namespaces: Vec<_> = roles(&c)
            .unwrap()
            .into_iter()
            .map(|r| (r.metadata.name.unwrap(), r.metadata.namespace.unwrap()))
            .collect();
        assert_eq!(
            namespaces,
            vec![
                ("prometheus-demo".into(), "monitoring".into()),
                ("prometheus-demo".into(), "default".into()),
                ("prometheus-demo".into(), "kube-system".into()),
                ("prometheus-demo".into(), "workspaces".into()),
                ("prometheus-demo-config".into(), "monitoring".into()),
            ]
        );

        let dup = cell("demo", "kube-system", "");
        assert_eq!(scrape_namespaces(&dup).unwrap(), vec!["kube-system", "default"]);
    }

    #[test]
    fn allow_list_restricts_every_remote_write() {
        let mut c = cell("demo", "monitoring", "workspaces");
        c.spec.metrics.upstream_remote_writes = vec![
            RemoteWriteSpec { url: "https://a.example/write".into(), ..Default::default() },
            RemoteWriteSpec { url: "https://b.example/write".into(), ..Default::default() },
        ];
        c.spec.metrics.upstream_allow_list = vec!["up".into(), "node_load1".into()];

        let writes = prometheus(&c).unwrap().spec.remote_write.unwrap();
        assert_eq!(writes.len(), 2);
        for rw in writes {
            let rules = rw.write_relabel_configs.unwrap();
            assert_eq!(rules[0].action.as_deref(), Some("keep"));
            assert_eq!(rules[0].regex.as_deref(), Some("(up|node_load1)"));
        }
    }
}
