#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use k8s_openapi::api::apps::v1::DeploymentStatus;
    use tokio_util::sync::CancellationToken;

    use crate::controller::ReconcileErr;
    use crate::controller::engine::{Engine, EngineSettings};
    use crate::controller::index::cell_owner;
    use crate::controller::pass::Pass;
    use crate::controller::readiness::EXPORTER_CHECKS;
    use crate::crd::cell::{CELL_API_VERSION, CELL_KIND};
    use crate::crd::monitoring::PrometheusStatus;
    use crate::crd::{Cell, ExporterStatus, WorkloadStatus};
    use crate::probe::{FixedProbe, up_query};
    use crate::store::memory::{MemoryStore, StoreOp};
    use crate::store::{ManagedKind, ManagedObject, ObjectKey, StoreError};
    use crate::templates::{gitpod, test_support::cell};

    struct Fixture {
        store: Arc<MemoryStore>,
        probe: Arc<FixedProbe>,
        engine: Engine,
        cell: Cell,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let probe = Arc::new(FixedProbe::new());
        let engine = Engine::new(store.clone(), probe.clone(), EngineSettings::default());
        Fixture {
            store,
            probe,
            engine,
            cell: cell("demo", "monitoring", "workspaces"),
        }
    }

    /// Objects with server-assigned fields removed.
    fn snapshot(store: &MemoryStore) -> Vec<ManagedObject> {
        store
            .objects()
            .into_iter()
            .map(|mut o| {
                let m = o.meta_mut();
                m.resource_version = None;
                m.uid = None;
                o
            })
            .collect()
    }

    fn mark_workloads_available(f: &Fixture) {
        let op = ObjectKey::namespaced(ManagedKind::Deployment, "monitoring", "prometheus-operator-demo");
        assert!(f.store.modify(&op, |o| {
            if let ManagedObject::Deployment(d) = o {
                d.status = Some(DeploymentStatus {
                    available_replicas: Some(1),
                    ..Default::default()
                });
            }
        }));
        let prom = ObjectKey::namespaced(ManagedKind::Prometheus, "monitoring", "prometheus-demo");
        assert!(f.store.modify(&prom, |o| {
            if let ManagedObject::Prometheus(p) = o {
                p.status = Some(PrometheusStatus {
                    available_replicas: 1,
                    ..Default::default()
                });
            }
        }));
    }

    #[tokio::test]
    async fn fresh_cell_end_to_end() {
        let f = fixture();
        let out = f.engine.run_pass(&f.cell, &Pass::unbounded()).await.unwrap();

        let created = f.store.keys_for(StoreOp::Create);
        assert_eq!(out.created, created.len());
        assert_eq!(out.updated, 0);

        let operator: Vec<(ManagedKind, &str)> = created[..6].iter().map(|k| (k.kind, k.name.as_str())).collect();
        assert_eq!(
            operator,
            vec![
                (ManagedKind::ClusterRole, "prometheus-operator-demo"),
                (ManagedKind::ClusterRoleBinding, "prometheus-operator-demo"),
                (ManagedKind::ServiceAccount, "prometheus-operator-demo"),
                (ManagedKind::Service, "prometheus-operator-demo"),
                (ManagedKind::Deployment, "prometheus-operator-demo"),
                (ManagedKind::ServiceMonitor, "prometheus-operator-demo"),
            ]
        );

        let pos = |kind: ManagedKind, name: &str| {
            created
                .iter()
                .position(|k| k.kind == kind && k.name == name)
                .unwrap_or_else(|| panic!("{kind} {name} not created"))
        };
        let prom_cr = pos(ManagedKind::Prometheus, "prometheus-demo");
        let node = pos(ManagedKind::DaemonSet, "node-exporter-demo");
        let ksm = pos(ManagedKind::Deployment, "kube-state-metrics-demo");
        let first_target = pos(ManagedKind::NetworkPolicy, &gitpod::network_policy_name(&gitpod::TARGETS[0]));
        assert!(pos(ManagedKind::ServiceMonitor, "prometheus-operator-demo") < pos(ManagedKind::ClusterRole, "prometheus-demo"));
        assert!(prom_cr < node && node < ksm && ksm < first_target);

        for t in gitpod::TARGETS {
            let np = pos(ManagedKind::NetworkPolicy, &gitpod::network_policy_name(t));
            let svc = pos(ManagedKind::Service, &gitpod::service_name(t));
            let sm = pos(ManagedKind::ServiceMonitor, &gitpod::service_name(t));
            assert!(ksm < np && np < svc && svc < sm, "{} out of order", t.name);
        }

        let status = f.store.persisted_status().unwrap();
        assert_eq!(status, out.status);
        assert!(!out.ready);
        for s in [status.prometheus_operator_ready.status, status.prometheus_ready.status] {
            assert!(matches!(s, WorkloadStatus::Reconciling | WorkloadStatus::Unknown));
        }
        for s in [
            status.node_exporter_ready.status,
            status.kube_state_metrics_ready.status,
            status.kubelet_ready.status,
            status.api_server_ready.status,
        ] {
            assert!(matches!(s, ExporterStatus::Reconciling | ExporterStatus::Unknown));
        }
        assert!(status.kubelet_ready.last_modified.is_some());
    }

    #[tokio::test]
    async fn second_pass_changes_nothing() {
        let f = fixture();
        let pass = Pass::unbounded();
        let first = f.engine.run_pass(&f.cell, &pass).await.unwrap();
        let before = snapshot(&f.store);

        let second = f.engine.run_pass(&f.cell, &pass).await.unwrap();
        assert_eq!(snapshot(&f.store), before);
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, first.created);
    }

    #[tokio::test]
    async fn every_object_is_owned_by_the_cell() {
        let f = fixture();
        f.engine.run_pass(&f.cell, &Pass::unbounded()).await.unwrap();
        for obj in f.store.objects() {
            let refs = obj.meta().owner_references.clone().unwrap_or_default();
            assert_eq!(refs.len(), 1, "{}", obj.key());
            let r = &refs[0];
            assert_eq!(r.api_version, CELL_API_VERSION);
            assert_eq!(r.kind, CELL_KIND);
            assert_eq!(r.name, "demo");
            assert_eq!(r.uid, "uid-demo");
        }
    }

    #[tokio::test]
    async fn exporter_failure_stops_before_targets() {
        let f = fixture();
        f.store.fail(
            StoreOp::Create,
            Some(ManagedKind::DaemonSet),
            None,
            StoreError::Unavailable("apiserver overloaded".into()),
        );

        let err = f.engine.run_pass(&f.cell, &Pass::unbounded()).await.unwrap_err();
        assert!(matches!(err, ReconcileErr::Create { ref key, .. } if key.kind == ManagedKind::DaemonSet));

        let touched_target = f.store.calls().iter().any(|c| {
            c.key
                .as_ref()
                .is_some_and(|k| match k.kind {
                    ManagedKind::NetworkPolicy => true,
                    ManagedKind::Service | ManagedKind::ServiceMonitor => k.name.starts_with("gitpod-"),
                    _ => false,
                })
        });
        assert!(!touched_target);
        assert_eq!(f.store.status_writes(), 0);
    }

    #[tokio::test]
    async fn becomes_ready_once_everything_is_scraped() {
        let f = fixture();
        let pass = Pass::unbounded();
        f.engine.run_pass(&f.cell, &pass).await.unwrap();
        mark_workloads_available(&f);
        for check in EXPORTER_CHECKS {
            f.probe.answer(up_query(check.job), Ok(check.expected));
        }

        let out = f.engine.run_pass(&f.cell, &pass).await.unwrap();
        assert!(out.ready);
        assert_eq!(out.status.kube_state_metrics_ready.status, ExporterStatus::Ready);
    }

    #[tokio::test]
    async fn deployment_status_survives_overwrite() {
        let f = fixture();
        let pass = Pass::unbounded();
        f.engine.run_pass(&f.cell, &pass).await.unwrap();
        mark_workloads_available(&f);

        let out = f.engine.run_pass(&f.cell, &pass).await.unwrap();
        assert_eq!(out.status.prometheus_operator_ready.status, WorkloadStatus::Ready);
        assert_eq!(out.status.prometheus_ready.status, WorkloadStatus::Ready);
    }

    #[tokio::test]
    async fn probe_error_is_persisted_then_returned() {
        let f = fixture();
        let pass = Pass::unbounded();
        f.engine.run_pass(&f.cell, &pass).await.unwrap();
        mark_workloads_available(&f);
        f.probe.answer(
            up_query("apiserver"),
            Err(crate::probe::ProbeError::Status {
                code: 503,
                body: "unavailable".into(),
            }),
        );

        let err = f.engine.run_pass(&f.cell, &pass).await.unwrap_err();
        assert!(matches!(err, ReconcileErr::Probe { subsystem: "apiserver", .. }));
        let status = f.store.persisted_status().unwrap();
        assert_eq!(status.api_server_ready.status, ExporterStatus::Unknown);
        assert_eq!(f.store.status_writes(), 2);
    }

    #[tokio::test]
    async fn status_write_failure_fails_the_pass() {
        let f = fixture();
        let conflict = StoreError::Api {
            code: 409,
            reason: "Conflict".into(),
            message: "the object has been modified".into(),
        };
        f.store.fail(StoreOp::Status, None, None, conflict);

        let err = f.engine.run_pass(&f.cell, &Pass::unbounded()).await.unwrap_err();
        assert!(matches!(err, ReconcileErr::StatusPersist(ref e) if e.is_conflict()));
        assert!(f.store.persisted_status().is_none());
    }

    #[tokio::test]
    async fn cancelled_pass_writes_nothing() {
        let f = fixture();
        let token = CancellationToken::new();
        token.cancel();

        let err = f.engine.run_pass(&f.cell, &Pass::new(token, None)).await.unwrap_err();
        assert!(matches!(err, ReconcileErr::Cancelled));
        assert!(f.store.objects().is_empty());
        assert_eq!(f.store.status_writes(), 0);
    }

    #[tokio::test]
    async fn cleanup_removes_unreachable_objects_only() {
        let f = fixture();
        f.engine.run_pass(&f.cell, &Pass::unbounded()).await.unwrap();
        let total = f.store.objects().len();

        let deleted = f.engine.cleanup(&f.cell, &Pass::unbounded()).await.unwrap();
        let left = f.store.objects();
        assert_eq!(left.len(), total - deleted);
        assert!(left.iter().all(|o| o.key().namespace.as_deref() == Some("monitoring")));

        let again = f.engine.cleanup(&f.cell, &Pass::unbounded()).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn cleanup_leaves_objects_controlled_by_another_cell() {
        let f = fixture();
        let a = cell("demo", "team-a", "ws-a");
        let mut b = cell("demo", "team-b", "workspaces");
        b.metadata.uid = Some("uid-b".into());
        f.engine.run_pass(&a, &Pass::unbounded()).await.unwrap();
        f.engine.run_pass(&b, &Pass::unbounded()).await.unwrap();

        let role = ObjectKey::cluster(ManagedKind::ClusterRole, "prometheus-demo");
        let owner_uid = |key: &ObjectKey| {
            f.store
                .get(key)
                .and_then(|o| cell_owner(o.meta()))
                .map(|o| o.uid)
        };
        assert_eq!(owner_uid(&role).as_deref(), Some("uid-b"));

        let deleted = f.engine.cleanup(&a, &Pass::unbounded()).await.unwrap();
        assert!(deleted > 0);
        assert_eq!(owner_uid(&role).as_deref(), Some("uid-b"));
        let left = f.store.objects();
        assert!(left.iter().all(|o| o.key().namespace.as_deref() != Some("ws-a")));
        assert!(left
            .iter()
            .filter(|o| o.key().namespace.is_none())
            .all(|o| owner_uid(&o.key()).as_deref() == Some("uid-b")));
        let deleted_keys = f.store.keys_for(StoreOp::Delete);
        assert!(deleted_keys.iter().all(|k| f.store.get(k).is_none()));
    }
}
