//! Idempotence and convergence of owned resources.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::Ingress;
use unit_operator::controller::reconciler::ReconcileOutcome;
use unit_operator::crd::{Unit, UnitCategory};
use unit_operator::resources::{ApplyOutcome, resolve_adapters};
use unit_operator::store::{MemoryStore, ResourceStore, Verb};

use crate::common::fixtures::{UnitBuilder, engine_with};
use crate::settle;

fn full_unit() -> Unit {
    UnitBuilder::new("web")
        .replicas(3)
        .service_port("http", 80, "TCP")
        .ingress_route("web.example.com", 80)
        .pvc("1Gi")
        .build()
}

/// Applying every adapter twice issues one write per adapter, all on the first round.
#[tokio::test]
async fn test_apply_twice_writes_once() {
    let store = MemoryStore::new();
    store.seed(&full_unit()).unwrap();
    let unit: Unit = store.get("default", "web").await.unwrap();
    let adapters = resolve_adapters(&unit.spec);
    assert_eq!(adapters.len(), 4);

    for adapter in &adapters {
        assert_eq!(adapter.apply(&unit, &store).await.unwrap(), ApplyOutcome::Created);
    }
    let after_first = store.writes().len();
    assert_eq!(after_first, adapters.len());

    for adapter in &adapters {
        assert_eq!(
            adapter.apply(&unit, &store).await.unwrap(),
            ApplyOutcome::Unchanged,
            "{} was rewritten",
            adapter.kind()
        );
    }
    assert_eq!(store.writes().len(), after_first);
}

/// A pass over an unchanged Unit writes nothing at all, status included.
#[tokio::test]
async fn test_second_pass_issues_no_writes() {
    let (engine, _, _) = engine_with(&full_unit());
    let outcome = settle(&engine, "web").await;
    assert!(matches!(
        outcome,
        ReconcileOutcome::Synced {
            status_written: true,
            ..
        }
    ));

    engine.store().clear_writes();
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Synced {
            status_written: false,
            ..
        }
    ));
    assert!(engine.store().writes().is_empty());
}

#[tokio::test]
async fn test_first_full_pass_creates_each_kind_once() {
    let (engine, _, _) = engine_with(&full_unit());
    settle(&engine, "web").await;

    let store = engine.store();
    assert_eq!(store.count::<StatefulSet>(), 1);
    assert_eq!(store.count::<Service>(), 1);
    assert_eq!(store.count::<Ingress>(), 1);
    assert_eq!(store.count::<PersistentVolumeClaim>(), 1);
    assert_eq!(store.count::<Deployment>(), 0);
    for kind_writes in [
        store.writes_for::<StatefulSet>(),
        store.writes_for::<Service>(),
        store.writes_for::<Ingress>(),
        store.writes_for::<PersistentVolumeClaim>(),
    ] {
        assert_eq!(kind_writes.len(), 1);
        assert_eq!(kind_writes[0].verb, Verb::Create);
    }
}

/// Replica count converges to the declared value whatever the stored object says.
#[tokio::test]
async fn test_replicas_converge_after_external_drift() {
    let (engine, _, _) = engine_with(&full_unit());
    settle(&engine, "web").await;

    engine
        .store()
        .modify::<StatefulSet>("default", "web", |sts| {
            if let Some(spec) = sts.spec.as_mut() {
                spec.replicas = Some(7);
            }
        })
        .unwrap();
    engine.store().clear_writes();

    engine.reconcile("default", "web").await.unwrap();

    let sts: StatefulSet = engine.store().snapshot("default", "web").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(3));
    let writes = engine.store().writes_for::<StatefulSet>();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].verb, Verb::Replace);
}

#[tokio::test]
async fn test_spec_change_updates_children() {
    let (engine, _, _) = engine_with(&full_unit());
    settle(&engine, "web").await;

    engine
        .store()
        .modify::<Unit>("default", "web", |unit| {
            unit.spec.replicas = Some(5);
            if let Some(service) = unit.spec.relation_resource.service.as_mut() {
                service.ports[0].port = 8080;
            }
            if let Some(ingress) = unit.spec.relation_resource.ingress.as_mut() {
                ingress.rules.clear();
            }
        })
        .unwrap();
    engine.reconcile("default", "web").await.unwrap();

    let sts: StatefulSet = engine.store().snapshot("default", "web").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(5));
    let svc: Service = engine.store().snapshot("default", "web").unwrap();
    let ports = svc.spec.unwrap().ports.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].port, 8080);
}

/// Unset replicas means one pod.
#[tokio::test]
async fn test_default_replicas() {
    let unit = UnitBuilder::new("solo").default_replicas().build();
    let (engine, _, _) = engine_with(&unit);
    let outcome = settle(&engine, "solo").await;

    assert!(
        matches!(
            outcome,
            ReconcileOutcome::Synced {
                desired_replicas: 1,
                ..
            }
        ),
        "unexpected outcome {:?}",
        outcome
    );
    let sts: StatefulSet = engine.store().snapshot("default", "solo").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(1));
}

#[tokio::test]
async fn test_deployment_category() {
    let unit = UnitBuilder::new("api")
        .category(UnitCategory::Deployment)
        .replicas(2)
        .build();
    let (engine, _, _) = engine_with(&unit);
    settle(&engine, "api").await;

    assert_eq!(engine.store().count::<StatefulSet>(), 0);
    let deployment: Deployment = engine.store().snapshot("default", "api").unwrap();
    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(2));
    assert_eq!(
        spec.template.metadata.unwrap().labels,
        spec.selector.match_labels
    );

    engine.store().clear_writes();
    engine.reconcile("default", "api").await.unwrap();
    assert!(engine.store().writes().is_empty());
}

/// Labels added to the Unit propagate to its children.
#[tokio::test]
async fn test_label_drift_is_repaired() {
    let (engine, _, _) = engine_with(&full_unit());
    settle(&engine, "web").await;

    engine
        .store()
        .modify::<Unit>("default", "web", |unit| {
            unit.metadata
                .labels
                .get_or_insert_with(Default::default)
                .insert("tier".to_string(), "frontend".to_string());
        })
        .unwrap();
    engine.reconcile("default", "web").await.unwrap();

    let svc: Service = engine.store().snapshot("default", "web").unwrap();
    assert_eq!(
        svc.metadata.labels.unwrap().get("tier").map(String::as_str),
        Some("frontend")
    );
}
