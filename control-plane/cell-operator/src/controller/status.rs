//! Status records and their persistence.

use chrono::{SecondsFormat, Utc};

use super::ReconcileErr;
use super::pass::Pass;
use crate::crd::{Cell, CellStatus, ExporterRecord, ExporterStatus, WorkloadRecord, WorkloadStatus};
use crate::store::ClusterStore;

pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn workload(status: WorkloadStatus, message: impl Into<String>) -> WorkloadRecord {
    WorkloadRecord {
        last_modified: None,
        status,
        message: message.into(),
    }
}

pub fn exporter(status: ExporterStatus, message: impl Into<String>) -> ExporterRecord {
    ExporterRecord {
        last_modified: None,
        status,
        message: message.into(),
    }
}

fn stamp_one(
    prev: Option<&str>,
    changed: bool,
    now: &str,
) -> Option<String> {
    match prev {
        Some(p) if !changed => Some(p.to_string()),
        _ => Some(now.to_string()),
    }
}

/// Sets `lastModified` on every record: carried over from `previous` when
/// the record's status and message did not change, `now` otherwise.
pub fn stamp(previous: Option<&CellStatus>, next: &mut CellStatus, now: &str) {
    let def = CellStatus::default();
    let prev = previous.unwrap_or(&def);

    for (p, n) in [
        (&prev.prometheus_operator_ready, &mut next.prometheus_operator_ready),
        (&prev.prometheus_ready, &mut next.prometheus_ready),
    ] {
        let changed = p.status != n.status || p.message != n.message;
        n.last_modified = stamp_one(p.last_modified.as_deref(), changed, now);
    }
    for (p, n) in [
        (&prev.node_exporter_ready, &mut next.node_exporter_ready),
        (&prev.kube_state_metrics_ready, &mut next.kube_state_metrics_ready),
        (&prev.kubelet_ready, &mut next.kubelet_ready),
        (&prev.api_server_ready, &mut next.api_server_ready),
    ] {
        let changed = p.status != n.status || p.message != n.message;
        n.last_modified = stamp_one(p.last_modified.as_deref(), changed, now);
    }
}

/// A cell is ready only when all six records are.
pub fn is_cell_ready(status: &CellStatus) -> bool {
    [&status.prometheus_operator_ready, &status.prometheus_ready]
        .iter()
        .all(|r| r.status == WorkloadStatus::Ready)
        && [
            &status.node_exporter_ready,
            &status.kube_state_metrics_ready,
            &status.kubelet_ready,
            &status.api_server_ready,
        ]
        .iter()
        .all(|r| r.status == ExporterStatus::Ready)
}

pub async fn persist(
    store: &dyn ClusterStore,
    pass: &Pass,
    cell: &Cell,
    status: &CellStatus,
) -> Result<(), ReconcileErr> {
    pass.run(store.update_cell_status(cell, status))
        .await?
        .map_err(ReconcileErr::StatusPersist)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_ready() -> CellStatus {
        CellStatus {
            prometheus_operator_ready: workload(WorkloadStatus::Ready, ""),
            prometheus_ready: workload(WorkloadStatus::Ready, ""),
            node_exporter_ready: exporter(ExporterStatus::Ready, ""),
            kube_state_metrics_ready: exporter(ExporterStatus::Ready, ""),
            kubelet_ready: exporter(ExporterStatus::Ready, ""),
            api_server_ready: exporter(ExporterStatus::Ready, ""),
        }
    }

    #[test]
    fn aggregate_needs_every_record() {
        assert!(is_cell_ready(&all_ready()));
        assert!(!is_cell_ready(&CellStatus::default()));

        let mut s = all_ready();
        s.kubelet_ready = exporter(ExporterStatus::MetricNotFound, "expected 3 timeseries, got 2");
        assert!(!is_cell_ready(&s));

        let mut s = all_ready();
        s.prometheus_ready = workload(WorkloadStatus::Reconciling, "");
        assert!(!is_cell_ready(&s));
    }

    #[test]
    fn stamp_keeps_time_of_unchanged_records() {
        let mut first = all_ready();
        stamp(None, &mut first, "2024-01-01T00:00:00Z");
        assert_eq!(first.kubelet_ready.last_modified.as_deref(), Some("2024-01-01T00:00:00Z"));

        let mut second = all_ready();
        second.kubelet_ready = exporter(ExporterStatus::Unknown, "timeout");
        stamp(Some(&first), &mut second, "2024-01-01T00:05:00Z");
        assert_eq!(second.prometheus_ready.last_modified.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(second.kubelet_ready.last_modified.as_deref(), Some("2024-01-01T00:05:00Z"));
    }
}
