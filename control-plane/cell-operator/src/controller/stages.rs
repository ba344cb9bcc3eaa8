//! The convergence order, declared as data.
//!
//! Within a stage, steps run top to bottom and each step's objects in the
//! order its builder returns them. RBAC and service accounts always come
//! before the workloads that reference them.

use kube::ResourceExt;

use crate::crd::Cell;
use crate::store::{ManagedKind, ManagedObject, ObjectKey};
use crate::templates::{
    TemplateError, cell_namespace, gitpod, kube_state_metrics as ksm, kubernetes,
    node_exporter, prometheus, prometheus_operator as operator,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    PrometheusOperator,
    Prometheus,
    Exporters,
    Targets,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::PrometheusOperator => "prometheus-operator",
            Stage::Prometheus => "prometheus",
            Stage::Exporters => "exporters",
            Stage::Targets => "targets",
        }
    }
}

pub type Builder = fn(&Cell) -> Result<Vec<ManagedObject>, TemplateError>;

#[derive(Clone, Copy)]
pub struct Step {
    pub kind: ManagedKind,
    pub component: &'static str,
    pub build: Builder,
}

pub struct StageDescriptor {
    pub stage: Stage,
    pub steps: &'static [Step],
}

fn each<T, F>(targets: &[gitpod::Target], build: F, wrap: fn(T) -> ManagedObject) -> Result<Vec<ManagedObject>, TemplateError>
where
    F: Fn(&gitpod::Target) -> Result<T, TemplateError>,
{
    targets.iter().map(|t| build(t).map(wrap)).collect()
}

pub const PIPELINE: &[StageDescriptor] = &[
    StageDescriptor {
        stage: Stage::PrometheusOperator,
        steps: &[
            Step {
                kind: ManagedKind::ClusterRole,
                component: operator::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ClusterRole(operator::cluster_role(c)?)]),
            },
            Step {
                kind: ManagedKind::ClusterRoleBinding,
                component: operator::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ClusterRoleBinding(operator::cluster_role_binding(c)?)]),
            },
            Step {
                kind: ManagedKind::ServiceAccount,
                component: operator::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ServiceAccount(operator::service_account(c)?)]),
            },
            Step {
                kind: ManagedKind::Service,
                component: operator::COMPONENT,
                build: |c| Ok(vec![ManagedObject::Service(operator::service(c)?)]),
            },
            Step {
                kind: ManagedKind::Deployment,
                component: operator::COMPONENT,
                build: |c| Ok(vec![ManagedObject::Deployment(operator::deployment(c)?)]),
            },
            Step {
                kind: ManagedKind::ServiceMonitor,
                component: operator::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ServiceMonitor(operator::service_monitor(c)?)]),
            },
        ],
    },
    StageDescriptor {
        stage: Stage::Prometheus,
        steps: &[
            Step {
                kind: ManagedKind::ClusterRole,
                component: prometheus::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ClusterRole(prometheus::cluster_role(c)?)]),
            },
            Step {
                kind: ManagedKind::ClusterRoleBinding,
                component: prometheus::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ClusterRoleBinding(prometheus::cluster_role_binding(c)?)]),
            },
            Step {
                kind: ManagedKind::Role,
                component: prometheus::COMPONENT,
                build: |c| Ok(prometheus::roles(c)?.into_iter().map(ManagedObject::Role).collect()),
            },
            Step {
                kind: ManagedKind::RoleBinding,
                component: prometheus::COMPONENT,
                build: |c| Ok(prometheus::role_bindings(c)?.into_iter().map(ManagedObject::RoleBinding).collect()),
            },
            Step {
                kind: ManagedKind::ServiceAccount,
                component: prometheus::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ServiceAccount(prometheus::service_account(c)?)]),
            },
            Step {
                kind: ManagedKind::Service,
                component: prometheus::COMPONENT,
                build: |c| Ok(vec![ManagedObject::Service(prometheus::service(c)?)]),
            },
            Step {
                kind: ManagedKind::ServiceMonitor,
                component: prometheus::COMPONENT,
                build: |c| Ok(vec![ManagedObject::ServiceMonitor(prometheus::service_monitor(c)?)]),
            },
            Step {
                kind: ManagedKind::Prometheus,
                component: prometheus::COMPONENT,
                build: |c| Ok(vec![ManagedObject::Prometheus(prometheus::prometheus(c)?)]),
            },
        ],
    },
    StageDescriptor {
        stage: Stage::Exporters,
        steps: &[
            Step {
                kind: ManagedKind::ClusterRole,
                component: "exporters",
                build: |c| {
                    Ok(vec![
                        ManagedObject::ClusterRole(node_exporter::cluster_role(c)?),
                        ManagedObject::ClusterRole(ksm::cluster_role(c)?),
                    ])
                },
            },
            Step {
                kind: ManagedKind::ClusterRoleBinding,
                component: "exporters",
                build: |c| {
                    Ok(vec![
                        ManagedObject::ClusterRoleBinding(node_exporter::cluster_role_binding(c)?),
                        ManagedObject::ClusterRoleBinding(ksm::cluster_role_binding(c)?),
                    ])
                },
            },
            Step {
                kind: ManagedKind::ServiceAccount,
                component: "exporters",
                build: |c| {
                    Ok(vec![
                        ManagedObject::ServiceAccount(node_exporter::service_account(c)?),
                        ManagedObject::ServiceAccount(ksm::service_account(c)?),
                    ])
                },
            },
            Step {
                kind: ManagedKind::Service,
                component: "exporters",
                build: |c| {
                    Ok(vec![
                        ManagedObject::Service(node_exporter::service(c)?),
                        ManagedObject::Service(ksm::service(c)?),
                    ])
                },
            },
            Step {
                kind: ManagedKind::DaemonSet,
                component: node_exporter::COMPONENT,
                build: |c| Ok(vec![ManagedObject::DaemonSet(node_exporter::daemon_set(c)?)]),
            },
            Step {
                kind: ManagedKind::Deployment,
                component: ksm::COMPONENT,
                build: |c| Ok(vec![ManagedObject::Deployment(ksm::deployment(c)?)]),
            },
            Step {
                kind: ManagedKind::ServiceMonitor,
                component: "exporters",
                build: |c| {
                    Ok(vec![
                        ManagedObject::ServiceMonitor(kubernetes::kubelet(c)?),
                        ManagedObject::ServiceMonitor(kubernetes::apiserver(c)?),
                        ManagedObject::ServiceMonitor(node_exporter::service_monitor(c)?),
                        ManagedObject::ServiceMonitor(ksm::service_monitor(c)?),
                    ])
                },
            },
        ],
    },
    StageDescriptor {
        stage: Stage::Targets,
        steps: &[
            Step {
                kind: ManagedKind::NetworkPolicy,
                component: gitpod::APP,
                build: |c| each(gitpod::TARGETS, |t| gitpod::network_policy(c, t), ManagedObject::NetworkPolicy),
            },
            Step {
                kind: ManagedKind::Service,
                component: gitpod::APP,
                build: |c| each(gitpod::TARGETS, |t| gitpod::service(c, t), ManagedObject::Service),
            },
            Step {
                kind: ManagedKind::ServiceMonitor,
                component: gitpod::APP,
                build: |c| each(gitpod::TARGETS, |t| gitpod::service_monitor(c, t), ManagedObject::ServiceMonitor),
            },
        ],
    },
];

/// Desired objects of one stage, in convergence order.
#[derive(Clone, Debug)]
pub struct PlannedStage {
    pub stage: Stage,
    pub objects: Vec<ManagedObject>,
}

/// Renders every stage for `cell`. Fails before anything is written if
/// any builder fails.
pub fn plan(cell: &Cell) -> Result<Vec<PlannedStage>, TemplateError> {
    PIPELINE
        .iter()
        .map(|desc| {
            let mut objects = Vec::new();
            for step in desc.steps {
                objects.extend((step.build)(cell)?);
            }
            Ok(PlannedStage {
                stage: desc.stage,
                objects,
            })
        })
        .collect()
}

/// Namespaced objects living outside the cell namespace. The garbage
/// collector sees their owner reference as unresolvable and removes them,
/// after which the next pass creates them again.
pub fn outside_cell_namespace(cell_ns: &str, key: &ObjectKey) -> bool {
    key.namespace.as_deref().is_some_and(|ns| ns != cell_ns)
}

/// Owned objects garbage collection cannot reach through owner
/// references: cluster-scoped ones and those outside the cell namespace.
/// Returned in reverse convergence order.
pub fn orphan_prone(cell: &Cell) -> Result<Vec<ObjectKey>, TemplateError> {
    let ns = cell_namespace(cell)?;
    let mut keys: Vec<ObjectKey> = plan(cell)?
        .into_iter()
        .flat_map(|s| s.objects)
        .map(|o| o.key())
        .filter(|k| k.namespace.as_deref() != Some(ns.as_str()))
        .collect();
    keys.reverse();
    tracing::trace!(cell = %cell.name_any(), count = keys.len(), "cleanup candidates");
    Ok(keys)
}
