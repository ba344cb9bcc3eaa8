#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::runtime::controller::Action;
    use tokio_util::sync::CancellationToken;

    use crate::config::test_config;
    use crate::controller::backoff::FailureTracker;
    use crate::controller::engine::{Engine, EngineSettings, PassOutcome};
    use crate::controller::events::{REASON_READY, REASON_RECONCILED};
    use crate::controller::reconcile::{FINALIZER, error_policy, next_action, pass_events, reconcile};
    use crate::controller::{ControllerContext, ReconcileErr};
    use crate::crd::Cell;
    use crate::probe::FixedProbe;
    use crate::store::memory::{MemoryStore, StoreOp};
    use crate::store::{ManagedKind, ManagedObject, ObjectKey, StoreError};
    use crate::templates::{TemplateError, prometheus_operator as operator, test_support::cell};

    fn context(store: Arc<MemoryStore>) -> Arc<ControllerContext> {
        let cfg = test_config();
        let engine = Engine::new(store, Arc::new(FixedProbe::new()), EngineSettings::from_config(&cfg));
        Arc::new(ControllerContext {
            cfg,
            engine,
            recorder: None,
            failures: FailureTracker::default(),
            shutdown: CancellationToken::new(),
        })
    }

    fn deleted_at() -> Time {
        serde_json::from_value(serde_json::json!("2024-05-01T10:00:00Z")).unwrap()
    }

    fn demo() -> Cell {
        cell("demo", "monitoring", "workspaces")
    }

    #[tokio::test]
    async fn first_sight_adds_finalizer_and_requeues() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());

        let action = reconcile(Arc::new(demo()), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        assert_eq!(store.finalizers(), vec![FINALIZER.to_string()]);
        // finalizer first, then convergence
        assert_eq!(store.calls()[0].op, StoreOp::Finalizers);
        assert!(store.persisted_status().is_some());
    }

    #[tokio::test]
    async fn finalizer_is_not_added_twice() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let mut c = demo();
        c.metadata.finalizers = Some(vec![FINALIZER.into()]);

        reconcile(Arc::new(c), ctx).await.unwrap();
        assert!(store.calls().iter().all(|call| call.op != StoreOp::Finalizers));
    }

    #[tokio::test]
    async fn deletion_cleans_up_and_releases_finalizer() {
        let store = Arc::new(MemoryStore::new());
        let c = demo();
        store.insert(ManagedObject::ClusterRole(operator::cluster_role(&c).unwrap()));
        store.insert(ManagedObject::ServiceAccount(operator::service_account(&c).unwrap()));
        let ctx = context(store.clone());

        let mut deleting = c.clone();
        deleting.metadata.finalizers = Some(vec!["other.io/keep".into(), FINALIZER.into()]);
        deleting.metadata.deletion_timestamp = Some(deleted_at());

        let action = reconcile(Arc::new(deleting), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(store.get(&ObjectKey::cluster(ManagedKind::ClusterRole, "prometheus-operator-demo")).is_none());
        // namespaced children are left to garbage collection
        assert!(store
            .get(&ObjectKey::namespaced(ManagedKind::ServiceAccount, "monitoring", "prometheus-operator-demo"))
            .is_some());
        assert_eq!(store.finalizers(), vec!["other.io/keep".to_string()]);
        assert!(store.keys_for(StoreOp::Create).is_empty());
    }

    #[tokio::test]
    async fn failed_cleanup_keeps_finalizer() {
        let store = Arc::new(MemoryStore::new());
        let c = demo();
        store.insert(ManagedObject::ClusterRole(operator::cluster_role(&c).unwrap()));
        store.fail(StoreOp::Delete, None, None, StoreError::Unavailable("timeout".into()));
        let ctx = context(store.clone());
        let mut deleting = c;
        deleting.metadata.finalizers = Some(vec![FINALIZER.into()]);
        deleting.metadata.deletion_timestamp = Some(deleted_at());

        let err = reconcile(Arc::new(deleting), ctx).await.unwrap_err();
        assert!(matches!(err, ReconcileErr::Delete { .. }));
        assert!(store.calls().iter().all(|call| call.op != StoreOp::Finalizers));
    }

    #[test]
    fn events_follow_creation_and_ready_transition() {
        let outcome = |created, ready| PassOutcome {
            status: Default::default(),
            ready,
            created,
            updated: 0,
        };
        let reasons = |o: &PassOutcome, was_ready| {
            pass_events(o, was_ready).into_iter().map(|(r, _)| r).collect::<Vec<_>>()
        };

        assert!(reasons(&outcome(0, false), false).is_empty());
        assert!(reasons(&outcome(0, true), true).is_empty());
        assert_eq!(reasons(&outcome(3, false), false), vec![REASON_RECONCILED]);
        assert_eq!(reasons(&outcome(0, true), false), vec![REASON_READY]);
        assert_eq!(
            pass_events(&outcome(60, true), false),
            vec![
                (REASON_RECONCILED, Some("Created 60 objects".to_string())),
                (REASON_READY, None)
            ]
        );
    }

    #[test]
    fn ready_waits_for_change() {
        let cfg = test_config();
        assert_eq!(next_action(true, &cfg), Action::await_change());
        assert_eq!(next_action(false, &cfg), Action::requeue(Duration::from_secs(5)));
    }

    #[test]
    fn errors_back_off_exponentially_per_cell() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let c = Arc::new(demo());
        let err = ReconcileErr::StatusPersist(StoreError::Unavailable("down".into()));

        assert_eq!(error_policy(c.clone(), &err, ctx.clone()), Action::requeue(Duration::from_secs(5)));
        assert_eq!(error_policy(c.clone(), &err, ctx.clone()), Action::requeue(Duration::from_secs(10)));
        assert_eq!(error_policy(c.clone(), &err, ctx.clone()), Action::requeue(Duration::from_secs(20)));
        assert_eq!(ctx.failures.failures("monitoring/demo"), 3);

        let fatal = ReconcileErr::Template(TemplateError::MissingUid("demo".into()));
        assert_eq!(error_policy(c, &fatal, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn success_resets_backoff() {
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store);
        ctx.failures.record_failure("monitoring/demo");
        reconcile(Arc::new(demo()), ctx.clone()).await.unwrap();
        assert_eq!(ctx.failures.failures("monitoring/demo"), 0);
    }
}
