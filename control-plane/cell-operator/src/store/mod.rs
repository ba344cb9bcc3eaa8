//! Access to cluster state for the objects a cell owns.
//!
//! The engine never touches `kube::Api` directly; it goes through
//! [`ClusterStore`], which the live controller backs with [`KubeStore`]
//! and tests back with `MemoryStore` (built with `cfg(test)` or the
//! `testing` feature).

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::monitoring::{Prometheus, ServiceMonitor};
use crate::crd::{Cell, CellStatus};

pub mod live;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

pub use live::KubeStore;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ManagedKind {
    ClusterRole,
    ClusterRoleBinding,
    Role,
    RoleBinding,
    ServiceAccount,
    Service,
    Deployment,
    DaemonSet,
    NetworkPolicy,
    ServiceMonitor,
    Prometheus,
}

impl ManagedKind {
    pub const ALL: [ManagedKind; 11] = [
        ManagedKind::ClusterRole,
        ManagedKind::ClusterRoleBinding,
        ManagedKind::Role,
        ManagedKind::RoleBinding,
        ManagedKind::ServiceAccount,
        ManagedKind::Service,
        ManagedKind::Deployment,
        ManagedKind::DaemonSet,
        ManagedKind::NetworkPolicy,
        ManagedKind::ServiceMonitor,
        ManagedKind::Prometheus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedKind::ClusterRole => "ClusterRole",
            ManagedKind::ClusterRoleBinding => "ClusterRoleBinding",
            ManagedKind::Role => "Role",
            ManagedKind::RoleBinding => "RoleBinding",
            ManagedKind::ServiceAccount => "ServiceAccount",
            ManagedKind::Service => "Service",
            ManagedKind::Deployment => "Deployment",
            ManagedKind::DaemonSet => "DaemonSet",
            ManagedKind::NetworkPolicy => "NetworkPolicy",
            ManagedKind::ServiceMonitor => "ServiceMonitor",
            ManagedKind::Prometheus => "Prometheus",
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, ManagedKind::ClusterRole | ManagedKind::ClusterRoleBinding)
    }
}

impl fmt::Display for ManagedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a managed object. `namespace` is `None` for cluster-scoped kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: ManagedKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(kind: ManagedKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(kind: ManagedKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("api error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("expected {expected}, store returned {found}")]
    KindMismatch {
        expected: ManagedKind,
        found: ManagedKind,
    },
}

impl StoreError {
    pub fn not_found(key: &ObjectKey) -> Self {
        StoreError::Api {
            code: 404,
            reason: "NotFound".into(),
            message: format!("{key} not found"),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Api { code: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Api { code: 409, .. })
    }
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) => StoreError::Api {
                code: ae.code,
                reason: ae.reason.clone(),
                message: ae.message.clone(),
            },
            kube::Error::SerdeError(e) => StoreError::Encode(e.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Result of reading one object: present, absent, or the read itself failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Found(T),
    NotFound,
    Failed(StoreError),
}

impl<T> Fetched<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        match self {
            Fetched::Found(v) => Fetched::Found(f(v)),
            Fetched::NotFound => Fetched::NotFound,
            Fetched::Failed(e) => Fetched::Failed(e),
        }
    }
}

impl<T> From<Result<Option<T>, StoreError>> for Fetched<T> {
    fn from(res: Result<Option<T>, StoreError>) -> Self {
        match res {
            Ok(Some(v)) => Fetched::Found(v),
            Ok(None) => Fetched::NotFound,
            Err(e) if e.is_not_found() => Fetched::NotFound,
            Err(e) => Fetched::Failed(e),
        }
    }
}

/// Any object a cell owns.
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Role(Role),
    RoleBinding(RoleBinding),
    ServiceAccount(ServiceAccount),
    Service(Service),
    Deployment(Deployment),
    DaemonSet(DaemonSet),
    NetworkPolicy(NetworkPolicy),
    ServiceMonitor(ServiceMonitor),
    Prometheus(Prometheus),
}

impl ManagedObject {
    pub fn kind(&self) -> ManagedKind {
        match self {
            ManagedObject::ClusterRole(_) => ManagedKind::ClusterRole,
            ManagedObject::ClusterRoleBinding(_) => ManagedKind::ClusterRoleBinding,
            ManagedObject::Role(_) => ManagedKind::Role,
            ManagedObject::RoleBinding(_) => ManagedKind::RoleBinding,
            ManagedObject::ServiceAccount(_) => ManagedKind::ServiceAccount,
            ManagedObject::Service(_) => ManagedKind::Service,
            ManagedObject::Deployment(_) => ManagedKind::Deployment,
            ManagedObject::DaemonSet(_) => ManagedKind::DaemonSet,
            ManagedObject::NetworkPolicy(_) => ManagedKind::NetworkPolicy,
            ManagedObject::ServiceMonitor(_) => ManagedKind::ServiceMonitor,
            ManagedObject::Prometheus(_) => ManagedKind::Prometheus,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ManagedObject::ClusterRole(o) => &o.metadata,
            ManagedObject::ClusterRoleBinding(o) => &o.metadata,
            ManagedObject::Role(o) => &o.metadata,
            ManagedObject::RoleBinding(o) => &o.metadata,
            ManagedObject::ServiceAccount(o) => &o.metadata,
            ManagedObject::Service(o) => &o.metadata,
            ManagedObject::Deployment(o) => &o.metadata,
            ManagedObject::DaemonSet(o) => &o.metadata,
            ManagedObject::NetworkPolicy(o) => &o.metadata,
            ManagedObject::ServiceMonitor(o) => &o.metadata,
            ManagedObject::Prometheus(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ManagedObject::ClusterRole(o) => &mut o.metadata,
            ManagedObject::ClusterRoleBinding(o) => &mut o.metadata,
            ManagedObject::Role(o) => &mut o.metadata,
            ManagedObject::RoleBinding(o) => &mut o.metadata,
            ManagedObject::ServiceAccount(o) => &mut o.metadata,
            ManagedObject::Service(o) => &mut o.metadata,
            ManagedObject::Deployment(o) => &mut o.metadata,
            ManagedObject::DaemonSet(o) => &mut o.metadata,
            ManagedObject::NetworkPolicy(o) => &mut o.metadata,
            ManagedObject::ServiceMonitor(o) => &mut o.metadata,
            ManagedObject::Prometheus(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn key(&self) -> ObjectKey {
        let kind = self.kind();
        ObjectKey {
            kind,
            namespace: if kind.is_cluster_scoped() {
                None
            } else {
                self.meta().namespace.clone()
            },
            name: self.name().to_string(),
        }
    }

    /// Overwrites `current` with this desired object's labels, name, owner
    /// references and payload. Everything else on `current`, notably
    /// `resourceVersion` and fields the API server allocated, is kept.
    pub fn converge_onto(&self, current: ManagedObject) -> Result<ManagedObject, StoreError> {
        use ManagedObject as M;
        let mut out = match (self, current) {
            (M::ClusterRole(d), M::ClusterRole(mut c)) => {
                c.rules = d.rules.clone();
                c.aggregation_rule = d.aggregation_rule.clone();
                M::ClusterRole(c)
            }
            (M::ClusterRoleBinding(d), M::ClusterRoleBinding(mut c)) => {
                c.role_ref = d.role_ref.clone();
                c.subjects = d.subjects.clone();
                M::ClusterRoleBinding(c)
            }
            (M::Role(d), M::Role(mut c)) => {
                c.rules = d.rules.clone();
                M::Role(c)
            }
            (M::RoleBinding(d), M::RoleBinding(mut c)) => {
                c.role_ref = d.role_ref.clone();
                c.subjects = d.subjects.clone();
                M::RoleBinding(c)
            }
            (M::ServiceAccount(d), M::ServiceAccount(mut c)) => {
                c.automount_service_account_token = d.automount_service_account_token;
                M::ServiceAccount(c)
            }
            (M::Service(d), M::Service(mut c)) => {
                let mut spec = d.spec.clone();
                // clusterIP is immutable once allocated
                if let (Some(spec), Some(current)) = (spec.as_mut(), c.spec.as_ref()) {
                    if current.cluster_ip.is_some() {
                        spec.cluster_ip = current.cluster_ip.clone();
                        spec.cluster_ips = current.cluster_ips.clone();
                    }
                    if spec.ip_families.is_none() {
                        spec.ip_families = current.ip_families.clone();
                        spec.ip_family_policy = current.ip_family_policy.clone();
                    }
                }
                c.spec = spec;
                M::Service(c)
            }
            (M::Deployment(d), M::Deployment(mut c)) => {
                c.spec = d.spec.clone();
                M::Deployment(c)
            }
            (M::DaemonSet(d), M::DaemonSet(mut c)) => {
                c.spec = d.spec.clone();
                M::DaemonSet(c)
            }
            (M::NetworkPolicy(d), M::NetworkPolicy(mut c)) => {
                c.spec = d.spec.clone();
                M::NetworkPolicy(c)
            }
            (M::ServiceMonitor(d), M::ServiceMonitor(mut c)) => {
                c.spec = d.spec.clone();
                M::ServiceMonitor(c)
            }
            (M::Prometheus(d), M::Prometheus(mut c)) => {
                c.spec = d.spec.clone();
                M::Prometheus(c)
            }
            (d, c) => {
                return Err(StoreError::KindMismatch {
                    expected: d.kind(),
                    found: c.kind(),
                });
            }
        };
        let desired = self.meta();
        let meta = out.meta_mut();
        meta.name = desired.name.clone();
        meta.labels = desired.labels.clone();
        meta.owner_references = desired.owner_references.clone();
        Ok(out)
    }
}

#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn fetch(&self, key: &ObjectKey) -> Fetched<ManagedObject>;

    async fn create(&self, obj: &ManagedObject) -> Result<(), StoreError>;

    /// Replace an object; `obj` must carry the `resourceVersion` it was read at.
    async fn update(&self, obj: &ManagedObject) -> Result<(), StoreError>;

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Write the status subresource, guarded by the cell's `resourceVersion`.
    async fn update_cell_status(&self, cell: &Cell, status: &CellStatus) -> Result<(), StoreError>;

    /// Replace the cell's finalizer list, returning the updated cell.
    async fn set_cell_finalizers(&self, cell: &Cell, finalizers: Vec<String>) -> Result<Cell, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{prometheus, test_support::cell};
    use k8s_openapi::api::core::v1::ServiceSpec;

    #[test]
    fn fetched_treats_404_as_absent() {
        let key = ObjectKey::cluster(ManagedKind::ClusterRole, "x");
        let f: Fetched<()> = Err(StoreError::not_found(&key)).into();
        assert_eq!(f, Fetched::NotFound);
        let f: Fetched<()> = Err(StoreError::Unavailable("boom".into())).into();
        assert!(matches!(f, Fetched::Failed(_)));
    }

    #[test]
    fn cluster_scoped_keys_drop_namespace() {
        let c = cell("demo", "monitoring", "workspaces");
        let obj = ManagedObject::ClusterRole(prometheus::cluster_role(&c).unwrap());
        assert_eq!(obj.key(), ObjectKey::cluster(ManagedKind::ClusterRole, "prometheus-demo"));
    }

    #[test]
    fn converge_keeps_resource_version_and_cluster_ip() {
        let c = cell("demo", "monitoring", "workspaces");
        let desired = ManagedObject::Service(prometheus::service(&c).unwrap());

        let mut live = prometheus::service(&c).unwrap();
        live.metadata.resource_version = Some("42".into());
        live.metadata.labels = Some(Default::default());
        live.spec = Some(ServiceSpec {
            cluster_ip: Some("10.0.0.7".into()),
            cluster_ips: Some(vec!["10.0.0.7".into()]),
            ..Default::default()
        });

        let merged = desired.converge_onto(ManagedObject::Service(live)).unwrap();
        let ManagedObject::Service(svc) = merged else {
            panic!("kind changed");
        };
        assert_eq!(svc.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(svc.metadata.labels, desired.meta().labels);
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(spec.ports.unwrap().len(), 2);
    }

    #[test]
    fn converge_rejects_kind_mismatch() {
        let c = cell("demo", "monitoring", "workspaces");
        let desired = ManagedObject::ServiceAccount(prometheus::service_account(&c).unwrap());
        let other = ManagedObject::Service(prometheus::service(&c).unwrap());
        assert!(matches!(
            desired.converge_onto(other),
            Err(StoreError::KindMismatch { .. })
        ));
    }
}
