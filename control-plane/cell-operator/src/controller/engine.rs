use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info};

use super::ReconcileErr;
use super::converge::{Upserted, upsert};
use super::pass::Pass;
use super::{index, readiness, stages, status};
use crate::config::{CellOperatorConfig, ExporterGate};
use crate::crd::{Cell, CellStatus};
use crate::probe::QueryExecutor;
use crate::store::{ClusterStore, Fetched};
use crate::templates::cell_namespace;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub exporter_gate: ExporterGate,
    pub prometheus_port: u16,
}

impl EngineSettings {
    pub fn from_config(cfg: &CellOperatorConfig) -> Self {
        Self {
            exporter_gate: cfg.exporter_gate(),
            prometheus_port: cfg.probe.port,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            exporter_gate: ExporterGate::default(),
            prometheus_port: 9090,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PassOutcome {
    pub status: CellStatus,
    pub ready: bool,
    pub created: usize,
    pub updated: usize,
}

/// Drives one cell toward its desired state. Holds no per-cell state;
/// concurrent passes for different cells share one engine.
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn ClusterStore>,
    probe: Arc<dyn QueryExecutor>,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(store: Arc<dyn ClusterStore>, probe: Arc<dyn QueryExecutor>, settings: EngineSettings) -> Self {
        Self {
            store,
            probe,
            settings,
        }
    }

    pub fn store(&self) -> &dyn ClusterStore {
        self.store.as_ref()
    }

    /// Converges every stage in order, evaluates readiness and writes the
    /// status. The first store failure in a stage ends the pass before any
    /// later object is touched and leaves the status alone.
    pub async fn run_pass(&self, cell: &Cell, pass: &Pass) -> Result<PassOutcome, ReconcileErr> {
        let plan = stages::plan(cell)?;
        let cell_ns = cell_namespace(cell)?;
        let (mut created, mut updated) = (0, 0);
        for stage in &plan {
            for obj in &stage.objects {
                match upsert(self.store(), pass, obj).await? {
                    Upserted::Created => {
                        created += 1;
                        let key = obj.key();
                        if stages::outside_cell_namespace(&cell_ns, &key) {
                            debug!(%key, "created outside the cell namespace; garbage collection may remove it again");
                        }
                    }
                    Upserted::Updated => updated += 1,
                }
            }
            debug!(stage = stage.stage.as_str(), objects = stage.objects.len(), "stage converged");
        }

        let readiness::Readiness { mut status, errors } =
            readiness::evaluate(self.store(), self.probe.as_ref(), pass, cell, &self.settings).await?;
        status::stamp(cell.status.as_ref(), &mut status, &status::now());
        status::persist(self.store(), pass, cell, &status).await?;

        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }
        let ready = status::is_cell_ready(&status);
        Ok(PassOutcome {
            status,
            ready,
            created,
            updated,
        })
    }

    /// Deletes the owned objects garbage collection will not remove for
    /// us, newest stage first. Objects whose controller is another cell
    /// with the same names are left alone. Returns how many were deleted.
    pub async fn cleanup(&self, cell: &Cell, pass: &Pass) -> Result<usize, ReconcileErr> {
        let uid = cell.uid();
        let mut deleted = 0;
        for key in stages::orphan_prone(cell)? {
            let current = match pass.run(self.store.fetch(&key)).await? {
                Fetched::Found(obj) => obj,
                Fetched::NotFound => continue,
                Fetched::Failed(source) => return Err(ReconcileErr::Fetch { key, source }),
            };
            let owner = index::cell_owner(current.meta()).map(|o| o.uid);
            if uid.is_none() || owner != uid {
                debug!(%key, owner = owner.as_deref().unwrap_or("none"), "not ours, skipped");
                continue;
            }
            match pass.run(self.store.delete(&key)).await? {
                Ok(()) => {
                    debug!(%key, "deleted");
                    deleted += 1;
                }
                Err(e) if e.is_not_found() => {}
                Err(source) => return Err(ReconcileErr::Delete { key, source }),
            }
        }
        info!(cell = %cell.name_any(), deleted, "cleanup finished");
        Ok(deleted)
    }
}
