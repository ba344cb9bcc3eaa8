//! Per-subsystem readiness for one pass.
//!
//! The operator and Prometheus are judged by available replicas on their
//! workload objects. Exporters are judged by asking the cell's Prometheus
//! how many `up` series it scrapes for each job.

use tracing::{debug, warn};

use super::ReconcileErr;
use super::engine::EngineSettings;
use super::pass::Pass;
use super::status::{exporter, workload};
use crate::config::ExporterGate;
use crate::crd::{Cell, CellStatus, ExporterRecord, ExporterStatus, WorkloadRecord, WorkloadStatus};
use crate::probe::{PrometheusTarget, QueryExecutor, up_query};
use crate::store::{ClusterStore, Fetched, ManagedKind, ManagedObject, ObjectKey};
use crate::templates::{
    cell_namespace, kube_state_metrics as ksm, kubernetes, node_exporter, prometheus,
    prometheus_operator as operator,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subsystem {
    PrometheusOperator,
    Prometheus,
    NodeExporter,
    KubeStateMetrics,
    Kubelet,
    ApiServer,
}

impl Subsystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subsystem::PrometheusOperator => "prometheus-operator",
            Subsystem::Prometheus => "prometheus",
            Subsystem::NodeExporter => "node-exporter",
            Subsystem::KubeStateMetrics => "kube-state-metrics",
            Subsystem::Kubelet => "kubelet",
            Subsystem::ApiServer => "apiserver",
        }
    }
}

/// One exporter whose scrape health is checked through Prometheus.
#[derive(Clone, Copy, Debug)]
pub struct ExporterCheck {
    pub subsystem: Subsystem,
    pub job: &'static str,
    /// Series `up{job=...} == 1` must return: one per scraped endpoint.
    pub expected: usize,
}

pub const EXPORTER_CHECKS: [ExporterCheck; 4] = [
    ExporterCheck {
        subsystem: Subsystem::NodeExporter,
        job: node_exporter::COMPONENT,
        expected: 1,
    },
    ExporterCheck {
        subsystem: Subsystem::KubeStateMetrics,
        job: ksm::COMPONENT,
        expected: 2,
    },
    ExporterCheck {
        subsystem: Subsystem::Kubelet,
        job: kubernetes::KUBELET,
        expected: 3,
    },
    ExporterCheck {
        subsystem: Subsystem::ApiServer,
        job: kubernetes::APISERVER,
        expected: 1,
    },
];

/// Evaluated status plus the errors hit while evaluating it. Errors are
/// already reflected as `Unknown` records; the engine persists the status
/// first and then fails the pass with the first error.
#[derive(Debug)]
pub struct Readiness {
    pub status: CellStatus,
    pub errors: Vec<ReconcileErr>,
}

enum Replicas {
    Available,
    NotReady(String),
    Failed(ReconcileErr),
}

async fn available_replicas(
    store: &dyn ClusterStore,
    pass: &Pass,
    subsystem: Subsystem,
    key: ObjectKey,
) -> Result<Replicas, ReconcileErr> {
    let available = match pass.run(store.fetch(&key)).await? {
        Fetched::Found(ManagedObject::Deployment(d)) => d.status.and_then(|s| s.available_replicas).unwrap_or(0),
        Fetched::Found(ManagedObject::Prometheus(p)) => p.status.map(|s| s.available_replicas).unwrap_or(0),
        Fetched::Found(other) => {
            return Ok(Replicas::NotReady(format!(
                "{} is a {}, expected {}",
                key.name,
                other.kind(),
                key.kind
            )));
        }
        Fetched::NotFound => return Ok(Replicas::NotReady(format!("{} not found", key))),
        Fetched::Failed(source) => return Ok(Replicas::Failed(ReconcileErr::Fetch { key, source })),
    };
    Ok(if available >= 1 {
        Replicas::Available
    } else {
        Replicas::NotReady(format!("{} has no available replicas", subsystem.as_str()))
    })
}

fn workload_record(subsystem: Subsystem, r: Replicas, errors: &mut Vec<ReconcileErr>) -> WorkloadRecord {
    match r {
        Replicas::Available => workload(WorkloadStatus::Ready, format!("{} is ready", subsystem.as_str())),
        Replicas::NotReady(msg) => workload(WorkloadStatus::Reconciling, msg),
        Replicas::Failed(e) => {
            let rec = workload(WorkloadStatus::Unknown, e.to_string());
            errors.push(e);
            rec
        }
    }
}

async fn check_exporter(
    probe: &dyn QueryExecutor,
    pass: &Pass,
    target: &PrometheusTarget,
    check: &ExporterCheck,
    errors: &mut Vec<ReconcileErr>,
) -> Result<ExporterRecord, ReconcileErr> {
    let name = check.subsystem.as_str();
    let rec = match pass.run(probe.series_count(target, &up_query(check.job))).await? {
        Ok(n) if n == check.expected => exporter(
            ExporterStatus::Ready,
            format!("We've successfully scraped metrics from {name}"),
        ),
        Ok(n) => exporter(
            ExporterStatus::MetricNotFound,
            format!("{name} is not ready, expected {} timeseries, got {n}", check.expected),
        ),
        Err(source) => {
            warn!(subsystem = name, error = %source, "readiness query failed");
            let rec = exporter(ExporterStatus::Unknown, source.to_string());
            errors.push(ReconcileErr::Probe {
                subsystem: name,
                source,
            });
            rec
        }
    };
    debug!(subsystem = name, status = ?rec.status, "exporter checked");
    Ok(rec)
}

/// Computes every record for `cell`. Only cancellation and the deadline
/// abort evaluation; other failures become `Unknown` records.
pub async fn evaluate(
    store: &dyn ClusterStore,
    probe: &dyn QueryExecutor,
    pass: &Pass,
    cell: &Cell,
    settings: &EngineSettings,
) -> Result<Readiness, ReconcileErr> {
    let ns = cell_namespace(cell)?;
    let gated = settings.exporter_gate == ExporterGate::PrometheusReady;
    let mut errors = Vec::new();
    let mut status = CellStatus::default();

    let op = available_replicas(
        store,
        pass,
        Subsystem::PrometheusOperator,
        ObjectKey::namespaced(ManagedKind::Deployment, &ns, operator::name(cell)),
    )
    .await?;
    status.prometheus_operator_ready = workload_record(Subsystem::PrometheusOperator, op, &mut errors);

    status.prometheus_ready = if gated && status.prometheus_operator_ready.status != WorkloadStatus::Ready {
        workload(WorkloadStatus::Reconciling, "waiting for prometheus-operator")
    } else {
        let prom = available_replicas(
            store,
            pass,
            Subsystem::Prometheus,
            ObjectKey::namespaced(ManagedKind::Prometheus, &ns, prometheus::name(cell)),
        )
        .await?;
        workload_record(Subsystem::Prometheus, prom, &mut errors)
    };

    let records = if gated && status.prometheus_ready.status != WorkloadStatus::Ready {
        let waiting = exporter(ExporterStatus::Reconciling, "waiting for prometheus");
        [waiting.clone(), waiting.clone(), waiting.clone(), waiting]
    } else {
        let target = PrometheusTarget::for_cell(cell, settings.prometheus_port).map_err(|source| ReconcileErr::Probe {
            subsystem: Subsystem::Prometheus.as_str(),
            source,
        })?;
        let mut out: [ExporterRecord; 4] = Default::default();
        for (slot, check) in out.iter_mut().zip(EXPORTER_CHECKS.iter()) {
            *slot = check_exporter(probe, pass, &target, check, &mut errors).await?;
        }
        out
    };
    let [node, kube_state, kubelet, api_server] = records;
    status.node_exporter_ready = node;
    status.kube_state_metrics_ready = kube_state;
    status.kubelet_ready = kubelet;
    status.api_server_ready = api_server;

    Ok(Readiness { status, errors })
}
