// Integration tests that expect a running cluster with the Cell CRD and
// the Prometheus Operator CRDs installed.
// Enable via: cargo test -p cell-operator --features testing --test it_k8s -- --ignored

use std::sync::Arc;

use cell_operator::config::CellOperatorConfig;
use cell_operator::controller::engine::{Engine, EngineSettings};
use cell_operator::controller::pass::Pass;
use cell_operator::crd::Cell;
use cell_operator::probe::FixedProbe;
use cell_operator::store::{ClusterStore, Fetched, KubeStore, ManagedKind, ObjectKey};
use envconfig::Envconfig;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};

mod common;
use common::{set_env, uniq};

async fn create_cell(client: &Client, ns: &str, name: &str) -> Cell {
    let api: Api<Cell> = Api::namespaced(client.clone(), ns);
    let mut desired = common::cell(name, ns, ns);
    desired.metadata.uid = None;
    api.create(&PostParams::default(), &desired).await.expect("create cell")
}

async fn create_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns: Namespace = serde_json::from_value(serde_json::json!({
        "metadata": { "name": name }
    }))
    .unwrap();
    api.create(&PostParams::default(), &ns).await.expect("create namespace");
}

#[test_log::test(tokio::test)]
#[ignore]
async fn converges_fresh_cell_in_cluster() {
    let _gate = set_env("CELL_OPERATOR_EXPORTER_GATE", "always");
    let cfg = CellOperatorConfig::init_from_env().expect("config");
    let client = Client::try_default().await.expect("kube client");

    let ns = uniq("cell-it");
    create_namespace(&client, &ns).await;
    let name = uniq("c");
    let cell = create_cell(&client, &ns, &name).await;

    let store = Arc::new(KubeStore::new(client.clone(), cfg.field_manager.clone()));
    let engine = Engine::new(store.clone(), Arc::new(FixedProbe::new()), EngineSettings::from_config(&cfg));

    let first = engine.run_pass(&cell, &Pass::unbounded()).await.expect("first pass");
    assert!(first.created > 0);
    assert!(!first.ready);

    let second = engine.run_pass(&cell, &Pass::unbounded()).await.expect("second pass");
    assert_eq!(second.created, 0);

    let sa = ObjectKey::namespaced(ManagedKind::ServiceAccount, &ns, format!("prometheus-operator-{name}"));
    assert!(matches!(store.fetch(&sa).await, Fetched::Found(_)));

    let removed = engine.cleanup(&cell, &Pass::unbounded()).await.expect("cleanup");
    assert!(removed > 0);
    let cr = ObjectKey::cluster(ManagedKind::ClusterRole, format!("prometheus-operator-{name}"));
    assert!(matches!(store.fetch(&cr).await, Fetched::NotFound));

    let _ = Api::<Namespace>::all(client)
        .delete(&ns, &DeleteParams::default())
        .await;
}
