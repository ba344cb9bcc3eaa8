//! Maps events on owned objects back to the cell that owns them.
//!
//! Owned objects live in other namespaces or at cluster scope, so the
//! namespace of the child says nothing about where the cell is. The owner
//! reference gives the cell's uid, which is looked up in the controller's
//! own cell cache.

use std::fmt::Debug;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{Controller, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::crd::cell::{CELL_API_VERSION, CELL_KIND};
use crate::crd::Cell;
use crate::crd::monitoring::{Prometheus, ServiceMonitor};
use crate::store::ManagedKind;
use crate::templates::labels::{PART_OF, PART_OF_VALUE};

/// Label selector every owned object matches.
pub fn owned_selector() -> String {
    format!("{PART_OF}={PART_OF_VALUE}")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerKey {
    pub name: String,
    pub uid: String,
}

/// The controlling Cell reference on `meta`, if any.
pub fn cell_owner(meta: &ObjectMeta) -> Option<OwnerKey> {
    meta.owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true) && r.kind == CELL_KIND && r.api_version == CELL_API_VERSION)
        .map(|r| OwnerKey {
            name: r.name.clone(),
            uid: r.uid.clone(),
        })
}

/// Finds the cached cell with the owner's uid. A cell recreated under the
/// same name has a new uid and does not claim the old one's children.
pub fn resolve<'a>(cells: impl IntoIterator<Item = &'a Cell>, owner: &OwnerKey) -> Option<ObjectRef<Cell>> {
    cells
        .into_iter()
        .find(|c| c.meta().uid.as_deref() == Some(owner.uid.as_str()) && c.meta().name.as_deref() == Some(owner.name.as_str()))
        .map(ObjectRef::from_obj)
}

fn watch_owned<K>(controller: Controller<Cell>, client: &Client, cells: &Store<Cell>) -> Controller<Cell>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let cells = cells.clone();
    let api: Api<K> = Api::all(client.clone());
    controller.watches(api, watcher::Config::default().labels(&owned_selector()), move |obj: K| {
        let owner = cell_owner(obj.meta())?;
        let cached = cells.state();
        resolve(cached.iter().map(|c| c.as_ref()), &owner)
    })
}

type Wire = fn(Controller<Cell>, &Client, &Store<Cell>) -> Controller<Cell>;

/// Every managed kind and how its watch is attached.
pub const WATCHED: [(ManagedKind, Wire); 11] = [
    (ManagedKind::ClusterRole, watch_owned::<ClusterRole>),
    (ManagedKind::ClusterRoleBinding, watch_owned::<ClusterRoleBinding>),
    (ManagedKind::Role, watch_owned::<Role>),
    (ManagedKind::RoleBinding, watch_owned::<RoleBinding>),
    (ManagedKind::ServiceAccount, watch_owned::<ServiceAccount>),
    (ManagedKind::Service, watch_owned::<Service>),
    (ManagedKind::Deployment, watch_owned::<Deployment>),
    (ManagedKind::DaemonSet, watch_owned::<DaemonSet>),
    (ManagedKind::NetworkPolicy, watch_owned::<NetworkPolicy>),
    (ManagedKind::ServiceMonitor, watch_owned::<ServiceMonitor>),
    (ManagedKind::Prometheus, watch_owned::<Prometheus>),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{gitpod, owner_ref, test_support::cell};

    #[test]
    fn every_managed_kind_is_watched() {
        let kinds: Vec<ManagedKind> = WATCHED.iter().map(|(k, _)| *k).collect();
        assert_eq!(kinds, ManagedKind::ALL.to_vec());
    }

    #[test]
    fn finds_controller_reference() {
        let c = cell("demo", "monitoring", "workspaces");
        let svc = gitpod::service(&c, &gitpod::TARGETS[0]).unwrap();
        assert_eq!(
            cell_owner(&svc.metadata),
            Some(OwnerKey {
                name: "demo".into(),
                uid: "uid-demo".into()
            })
        );
    }

    #[test]
    fn ignores_foreign_owners() {
        let c = cell("demo", "monitoring", "workspaces");
        let mut foreign = owner_ref(&c).unwrap();
        foreign.kind = "ReplicaSet".into();
        foreign.api_version = "apps/v1".into();
        let meta = ObjectMeta {
            owner_references: Some(vec![foreign]),
            ..Default::default()
        };
        assert_eq!(cell_owner(&meta), None);

        let mut weak = owner_ref(&c).unwrap();
        weak.controller = None;
        let meta = ObjectMeta {
            owner_references: Some(vec![weak]),
            ..Default::default()
        };
        assert_eq!(cell_owner(&meta), None);
    }

    #[test]
    fn resolves_to_cell_namespace_by_uid() {
        let demo = cell("demo", "monitoring", "workspaces");
        let other = cell("other", "team-b", "workspaces");
        let owner = OwnerKey {
            name: "demo".into(),
            uid: "uid-demo".into(),
        };
        let found = resolve([&other, &demo], &owner).unwrap();
        assert_eq!(found.name, "demo");
        assert_eq!(found.namespace.as_deref(), Some("monitoring"));

        let stale = OwnerKey {
            name: "demo".into(),
            uid: "uid-previous".into(),
        };
        assert!(resolve([&demo], &stale).is_none());
    }
}
