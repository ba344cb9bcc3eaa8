//! In-process [`ClusterStore`] with API-server-like versioning, a call
//! journal and injectable failures. Used by the engine tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use kube::ResourceExt;

use super::{ClusterStore, Fetched, ManagedKind, ManagedObject, ObjectKey, StoreError};
use crate::crd::{Cell, CellStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreOp {
    Fetch,
    Create,
    Update,
    Delete,
    Status,
    Finalizers,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub key: Option<ObjectKey>,
}

struct Failure {
    op: StoreOp,
    kind: Option<ManagedKind>,
    name: Option<String>,
    error: StoreError,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, ManagedObject>,
    calls: Vec<StoreCall>,
    failures: Vec<Failure>,
    statuses: Vec<CellStatus>,
    finalizers: Vec<String>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn record(&mut self, op: StoreOp, key: Option<&ObjectKey>) -> Result<(), StoreError> {
        self.calls.push(StoreCall {
            op,
            key: key.cloned(),
        });
        let hit = self.failures.iter().find(|f| {
            f.op == op
                && f.kind.is_none_or(|k| key.is_some_and(|key| key.kind == k))
                && f.name
                    .as_deref()
                    .is_none_or(|n| key.is_some_and(|key| key.name == n))
        });
        match hit {
            Some(f) => Err(f.error.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an object as if another actor had created it.
    pub fn insert(&self, mut obj: ManagedObject) {
        let mut state = self.state();
        obj.meta_mut().resource_version = Some(state.next_version());
        state.objects.insert(obj.key(), obj);
    }

    /// Mutate a stored object in place, e.g. to report replicas.
    pub fn modify(&self, key: &ObjectKey, f: impl FnOnce(&mut ManagedObject)) -> bool {
        let mut state = self.state();
        let version = state.next_version();
        match state.objects.get_mut(key) {
            Some(obj) => {
                f(obj);
                obj.meta_mut().resource_version = Some(version);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &ObjectKey) -> Option<ManagedObject> {
        self.state().objects.get(key).cloned()
    }

    pub fn objects(&self) -> Vec<ManagedObject> {
        self.state().objects.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Keys passed to `op`, in call order.
    pub fn keys_for(&self, op: StoreOp) -> Vec<ObjectKey> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .filter_map(|c| c.key.clone())
            .collect()
    }

    pub fn persisted_status(&self) -> Option<CellStatus> {
        self.state().statuses.last().cloned()
    }

    pub fn status_writes(&self) -> usize {
        self.state().statuses.len()
    }

    pub fn finalizers(&self) -> Vec<String> {
        self.state().finalizers.clone()
    }

    /// Fail every `op` matching the optional kind and name filters.
    pub fn fail(&self, op: StoreOp, kind: Option<ManagedKind>, name: Option<&str>, error: StoreError) {
        self.state().failures.push(Failure {
            op,
            kind,
            name: name.map(str::to_string),
            error,
        });
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }
}

fn conflict(key: &ObjectKey) -> StoreError {
    StoreError::Api {
        code: 409,
        reason: "Conflict".into(),
        message: format!("{key} has been modified; please apply your changes to the latest version"),
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn fetch(&self, key: &ObjectKey) -> Fetched<ManagedObject> {
        let mut state = self.state();
        if let Err(e) = state.record(StoreOp::Fetch, Some(key)) {
            return Fetched::Failed(e);
        }
        match state.objects.get(key) {
            Some(obj) => Fetched::Found(obj.clone()),
            None => Fetched::NotFound,
        }
    }

    async fn create(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        let key = obj.key();
        let mut state = self.state();
        state.record(StoreOp::Create, Some(&key))?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::Api {
                code: 409,
                reason: "AlreadyExists".into(),
                message: format!("{key} already exists"),
            });
        }
        let mut obj = obj.clone();
        let version = state.next_version();
        let meta = obj.meta_mut();
        meta.resource_version = Some(version.clone());
        meta.uid = Some(format!("uid-{version}"));
        state.objects.insert(key, obj);
        Ok(())
    }

    async fn update(&self, obj: &ManagedObject) -> Result<(), StoreError> {
        let key = obj.key();
        let mut state = self.state();
        state.record(StoreOp::Update, Some(&key))?;
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::not_found(&key))?;
        if current.meta().resource_version != obj.meta().resource_version {
            return Err(conflict(&key));
        }
        let mut obj = obj.clone();
        obj.meta_mut().resource_version = Some(state.next_version());
        state.objects.insert(key, obj);
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state();
        state.record(StoreOp::Delete, Some(key))?;
        state
            .objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn update_cell_status(&self, _cell: &Cell, status: &CellStatus) -> Result<(), StoreError> {
        let mut state = self.state();
        state.record(StoreOp::Status, None)?;
        state.statuses.push(status.clone());
        Ok(())
    }

    async fn set_cell_finalizers(&self, cell: &Cell, finalizers: Vec<String>) -> Result<Cell, StoreError> {
        let mut state = self.state();
        state.record(StoreOp::Finalizers, None)?;
        state.finalizers = finalizers.clone();
        let mut cell = cell.clone();
        cell.metadata.finalizers = Some(finalizers);
        cell.metadata.resource_version = Some(state.next_version());
        tracing::trace!(name = %cell.name_any(), "finalizers updated");
        Ok(cell)
    }
}
