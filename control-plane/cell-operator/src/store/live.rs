use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Service, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::trace;

use super::{ClusterStore, Fetched, ManagedKind, ManagedObject, ObjectKey, StoreError};
use crate::crd::monitoring::{Prometheus, ServiceMonitor};
use crate::crd::{Cell, CellStatus};

/// [`ClusterStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    field_manager: String,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn ns_api<K>(&self, namespace: Option<&str>, name: &str) -> Result<Api<K>, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let ns = namespace
            .ok_or_else(|| StoreError::Encode(format!("{} {name} has no namespace", K::kind(&()))))?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }

    fn cluster_api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    async fn get_ns<K>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let api: Api<K> = self.ns_api(key.namespace.as_deref(), &key.name)?;
        Ok(api.get_opt(&key.name).await?)
    }

    async fn get_cluster<K>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        Ok(self.cluster_api::<K>().get_opt(&key.name).await?)
    }

    async fn create_ns<K>(&self, obj: &K) -> Result<(), StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let api: Api<K> = self.ns_api(obj.meta().namespace.as_deref(), &obj.name_any())?;
        api.create(&self.post_params(), obj).await?;
        Ok(())
    }

    async fn create_cluster<K>(&self, obj: &K) -> Result<(), StoreError>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        self.cluster_api::<K>().create(&self.post_params(), obj).await?;
        Ok(())
    }

    async fn replace_ns<K>(&self, obj: &K) -> Result<(), StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let name = obj.name_any();
        let api: Api<K> = self.ns_api(obj.meta().namespace.as_deref(), &name)?;
        api.replace(&name, &self.post_params(), obj).await?;
        Ok(())
    }

    async fn replace_cluster<K>(&self, obj: &K) -> Result<(), StoreError>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + Debug,
    {
        let name = obj.name_any();
        self.cluster_api::<K>()
            .replace(&name, &self.post_params(), obj)
            .await?;
        Ok(())
    }

    async fn delete_ns<K>(&self, key: &ObjectKey) -> Result<(), StoreError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        let api: Api<K> = self.ns_api(key.namespace.as_deref(), &key.name)?;
        api.delete(&key.name, &DeleteParams::background()).await?;
        Ok(())
    }

    async fn delete_cluster<K>(&self, key: &ObjectKey) -> Result<(), StoreError>
    where
        K: Resource<Scope = ClusterResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
    {
        self.cluster_api::<K>()
            .delete(&key.name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    fn cell_api(&self, cell: &Cell) -> Result<Api<Cell>, StoreError> {
        self.ns_api(cell.namespace().as_deref(), &cell.name_any())
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn fetch(&self, key: &ObjectKey) -> Fetched<ManagedObject> {
        trace!(%key, "fetch");
        use ManagedObject as M;
        let res = match key.kind {
            ManagedKind::ClusterRole => self.get_cluster::<ClusterRole>(key).await.map(|o| o.map(M::ClusterRole)),
            ManagedKind::ClusterRoleBinding => {
                self.get_cluster::<ClusterRoleBinding>(key).await.map(|o| o.map(M::ClusterRoleBinding))
            }
            ManagedKind::Role => self.get_ns::<Role>(key).await.map(|o| o.map(M::Role)),
            ManagedKind::RoleBinding => self.get_ns::<RoleBinding>(key).await.map(|o| o.map(M::RoleBinding)),
            ManagedKind::ServiceAccount => self.get_ns::<ServiceAccount>(key).await.map(|o| o.map(M::ServiceAccount)),
            ManagedKind::Service => self.get_ns::<Service>(key).await.map(|o| o.map(M::Service)),
            ManagedKind::Deployment => self.get_ns::<Deployment>(key).await.map(|o| o.map(M::Deployment)),
            ManagedKind::DaemonSet => self.get_ns::<DaemonSet>(key).await.map(|o| o.map(M::DaemonSet)),
            ManagedKind::NetworkPolicy => self.get_ns::<NetworkPolicy>(key).await.map(|o| o.map(M::NetworkPolicy)),
            ManagedKind::ServiceMonitor => self.get_ns::<ServiceMonitor>(key).await.map(|o| o.map(M::ServiceMonitor)),
            ManagedKind::Prometheus => self.get_ns::<Prometheus>(key).await.map(|o| o.map(M::Prometheus)),
        };
        res.into()
    }

    async fn create(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        match obj {
            ManagedObject::ClusterRole(o) => self.create_cluster(o).await,
            ManagedObject::ClusterRoleBinding(o) => self.create_cluster(o).await,
            ManagedObject::Role(o) => self.create_ns(o).await,
            ManagedObject::RoleBinding(o) => self.create_ns(o).await,
            ManagedObject::ServiceAccount(o) => self.create_ns(o).await,
            ManagedObject::Service(o) => self.create_ns(o).await,
            ManagedObject::Deployment(o) => self.create_ns(o).await,
            ManagedObject::DaemonSet(o) => self.create_ns(o).await,
            ManagedObject::NetworkPolicy(o) => self.create_ns(o).await,
            ManagedObject::ServiceMonitor(o) => self.create_ns(o).await,
            ManagedObject::Prometheus(o) => self.create_ns(o).await,
        }
    }

    async fn update(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        match obj {
            ManagedObject::ClusterRole(o) => self.replace_cluster(o).await,
            ManagedObject::ClusterRoleBinding(o) => self.replace_cluster(o).await,
            ManagedObject::Role(o) => self.replace_ns(o).await,
            ManagedObject::RoleBinding(o) => self.replace_ns(o).await,
            ManagedObject::ServiceAccount(o) => self.replace_ns(o).await,
            ManagedObject::Service(o) => self.replace_ns(o).await,
            ManagedObject::Deployment(o) => self.replace_ns(o).await,
            ManagedObject::DaemonSet(o) => self.replace_ns(o).await,
            ManagedObject::NetworkPolicy(o) => self.replace_ns(o).await,
            ManagedObject::ServiceMonitor(o) => self.replace_ns(o).await,
            ManagedObject::Prometheus(o) => self.replace_ns(o).await,
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        match key.kind {
            ManagedKind::ClusterRole => self.delete_cluster::<ClusterRole>(key).await,
            ManagedKind::ClusterRoleBinding => self.delete_cluster::<ClusterRoleBinding>(key).await,
            ManagedKind::Role => self.delete_ns::<Role>(key).await,
            ManagedKind::RoleBinding => self.delete_ns::<RoleBinding>(key).await,
            ManagedKind::ServiceAccount => self.delete_ns::<ServiceAccount>(key).await,
            ManagedKind::Service => self.delete_ns::<Service>(key).await,
            ManagedKind::Deployment => self.delete_ns::<Deployment>(key).await,
            ManagedKind::DaemonSet => self.delete_ns::<DaemonSet>(key).await,
            ManagedKind::NetworkPolicy => self.delete_ns::<NetworkPolicy>(key).await,
            ManagedKind::ServiceMonitor => self.delete_ns::<ServiceMonitor>(key).await,
            ManagedKind::Prometheus => self.delete_ns::<Prometheus>(key).await,
        }
    }

    async fn update_cell_status(&self, cell: &Cell, status: &CellStatus) -> Result<(), StoreError> {
        let api = self.cell_api(cell)?;
        // resourceVersion turns the merge patch into a guarded write
        let patch = json!({
            "metadata": { "resourceVersion": cell.resource_version() },
            "status": status,
        });
        let pp = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        api.patch_status(&cell.name_any(), &pp, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_cell_finalizers(&self, cell: &Cell, finalizers: Vec<String>) -> Result<Cell, StoreError> {
        let api = self.cell_api(cell)?;
        let patch = json!({"metadata": {"finalizers": finalizers}});
        Ok(api
            .patch(&cell.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}
