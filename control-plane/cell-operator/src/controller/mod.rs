use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use kube::{
    Api, Client,
    runtime::{
        Controller,
        events::{Recorder, Reporter},
        watcher::Config,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{CellOperatorConfig, ProbeMode};
use crate::crd::Cell;
use crate::probe::{HttpQueryExecutor, PodProxyExecutor, ProbeError, QueryExecutor};
use crate::store::{ClusterStore, KubeStore, ObjectKey, StoreError};
use crate::templates::TemplateError;

pub mod backoff;
pub mod converge;
pub mod engine;
pub mod events;
pub mod index;
pub mod pass;
pub mod readiness;
pub mod reconcile;
pub mod stages;
pub mod status;

#[cfg(test)]
mod engine_tests;
#[cfg(test)]
mod reconcile_tests;

use backoff::FailureTracker;
use engine::{Engine, EngineSettings};
use pass::Pass;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("fetching {key} failed: {source}")]
    Fetch {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
    #[error("creating {key} failed: {source}")]
    Create {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
    #[error("updating {key} failed: {source}")]
    Update {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
    #[error("deleting {key} failed: {source}")]
    Delete {
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
    #[error("{subsystem} readiness query failed: {source}")]
    Probe {
        subsystem: &'static str,
        #[source]
        source: ProbeError,
    },
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("status update failed: {0}")]
    StatusPersist(#[source] StoreError),
    #[error("finalizer update failed: {0}")]
    Finalizer(#[source] StoreError),
    #[error("pass cancelled")]
    Cancelled,
    #[error("pass exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl ReconcileErr {
    /// Whether the harness should retry with backoff. Template errors need
    /// the cell itself to change; cancellation means we are shutting down.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcileErr::Template(_) | ReconcileErr::Cancelled)
    }
}

pub struct ControllerContext {
    pub cfg: CellOperatorConfig,
    pub engine: Engine,
    pub recorder: Option<Recorder>,
    pub failures: FailureTracker,
    pub shutdown: CancellationToken,
}

impl ControllerContext {
    pub fn new_pass(&self) -> Pass {
        Pass::new(self.shutdown.child_token(), self.cfg.pass_timeout())
    }
}

fn build_probe(client: &Client, cfg: &CellOperatorConfig) -> anyhow::Result<Arc<dyn QueryExecutor>> {
    Ok(match cfg.probe.mode() {
        ProbeMode::Proxy => Arc::new(PodProxyExecutor::new(client.clone())),
        ProbeMode::Http => {
            let template = cfg.probe.url_template.clone().ok_or_else(|| {
                anyhow::anyhow!("CELL_OPERATOR_PROM_URL_TEMPLATE is required in http probe mode")
            })?;
            Arc::new(HttpQueryExecutor::new(template, cfg.probe.query_timeout())?)
        }
    })
}

pub async fn run_controller(
    client: Client,
    cfg: CellOperatorConfig,
    shutdown: CancellationToken,
    ready: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let cells: Api<Cell> = match cfg.watch_namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let store: Arc<dyn ClusterStore> = Arc::new(KubeStore::new(client.clone(), cfg.field_manager.clone()));
    let engine = Engine::new(store, build_probe(&client, &cfg)?, EngineSettings::from_config(&cfg));
    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: cfg.field_manager.clone(),
            instance: None,
        },
    );
    let ctx = Arc::new(ControllerContext {
        cfg,
        engine,
        recorder: Some(recorder),
        failures: FailureTracker::default(),
        shutdown: shutdown.clone(),
    });

    let mut controller = Controller::new(cells, Config::default());
    let cache = controller.store();
    for (kind, wire) in index::WATCHED {
        debug!(%kind, "watching owned objects");
        controller = wire(controller, &client, &cache);
    }

    ready.store(true, Ordering::SeqCst);
    info!("cell controller started");

    controller
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile::reconcile, reconcile::error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => debug!(cell = %obj_ref, ?action, "reconciled"),
                // error_policy already logged the reconcile error
                Err(e) => debug!(error = %e, "controller event"),
            }
        })
        .await;

    ready.store(false, Ordering::SeqCst);
    info!("cell controller stopped");
    Ok(())
}
