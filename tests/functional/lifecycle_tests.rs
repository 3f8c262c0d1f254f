//! Finalizer ordering and the delete flow.

use std::sync::atomic::Ordering;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use unit_operator::controller::error::Error;
use unit_operator::controller::finalizer::DEFAULT_FINALIZER;
use unit_operator::controller::reconciler::ReconcileOutcome;
use unit_operator::crd::Unit;
use unit_operator::store::Verb;

use crate::common::fixtures::{UnitBuilder, engine_with};
use crate::settle;

fn unit() -> Unit {
    UnitBuilder::new("web")
        .replicas(2)
        .service_port("http", 80, "TCP")
        .build()
}

/// The token is persisted before any owned object is created.
#[tokio::test]
async fn test_finalizer_precedes_every_create() {
    let (engine, _, _) = engine_with(&unit());
    settle(&engine, "web").await;

    let writes = engine.store().writes();
    let token_write = writes
        .iter()
        .position(|w| w.kind == "Unit" && w.verb == Verb::Replace)
        .expect("finalizer write");
    let first_create = writes
        .iter()
        .position(|w| w.verb == Verb::Create)
        .expect("child create");
    assert!(token_write < first_create);
}

#[tokio::test]
async fn test_deferred_pass_creates_nothing() {
    let (engine, _, _) = engine_with(&unit());

    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Deferred);
    assert_eq!(engine.store().count::<StatefulSet>(), 0);
    assert_eq!(engine.store().count::<Service>(), 0);

    let stored: Unit = engine.store().snapshot("default", "web").unwrap();
    assert_eq!(stored.finalizers(), &[DEFAULT_FINALIZER.to_string()]);
}

/// A Unit that already carries the token is applied in one pass.
#[tokio::test]
async fn test_existing_token_proceeds_directly() {
    let unit = UnitBuilder::new("web").finalizer(DEFAULT_FINALIZER).build();
    let (engine, _, _) = engine_with(&unit);

    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::Synced { .. }));
    assert_eq!(engine.store().count::<StatefulSet>(), 1);
}

/// Other finalizers are kept when ours is added or removed.
#[tokio::test]
async fn test_foreign_finalizers_untouched() {
    let unit = UnitBuilder::new("web").finalizer("backup.example.com/guard").build();
    let (engine, _, _) = engine_with(&unit);
    settle(&engine, "web").await;

    let stored: Unit = engine.store().snapshot("default", "web").unwrap();
    assert_eq!(
        stored.finalizers(),
        &[
            "backup.example.com/guard".to_string(),
            DEFAULT_FINALIZER.to_string()
        ]
    );

    engine.store().request_deletion::<Unit>("default", "web").unwrap();
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Released);

    let stored: Unit = engine.store().snapshot("default", "web").unwrap();
    assert_eq!(stored.finalizers(), &["backup.example.com/guard".to_string()]);
}

/// Hook success removes the token; the store then removes the Unit and its children.
#[tokio::test]
async fn test_delete_flow_releases_and_cascades() {
    let (engine, _, hook) = engine_with(&unit());
    settle(&engine, "web").await;
    assert_eq!(engine.store().count::<StatefulSet>(), 1);

    engine.store().request_deletion::<Unit>("default", "web").unwrap();
    engine.store().clear_writes();

    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Released);
    assert_eq!(hook.calls(), 1);

    // Only the token removal was written; no apply ran
    let writes = engine.store().writes();
    assert_eq!(writes.len(), 1);
    assert_eq!((writes[0].kind.as_str(), writes[0].verb), ("Unit", Verb::Replace));

    assert!(engine.store().snapshot::<Unit>("default", "web").is_none());
    assert_eq!(engine.store().count::<StatefulSet>(), 0);
    assert_eq!(engine.store().count::<Service>(), 0);

    engine.store().clear_writes();
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Gone);
    assert!(engine.store().writes().is_empty());
    assert_eq!(hook.calls(), 1);
}

/// A failing hook keeps the token and the children until it succeeds.
#[tokio::test]
async fn test_failing_hook_blocks_deletion() {
    let (engine, _, hook) = engine_with(&unit());
    settle(&engine, "web").await;

    hook.fail.store(true, Ordering::SeqCst);
    engine.store().request_deletion::<Unit>("default", "web").unwrap();
    engine.store().clear_writes();

    for attempt in 1..=3 {
        let err = engine.reconcile("default", "web").await.unwrap_err();
        assert!(matches!(err, Error::PreDelete(_)));
        assert!(err.is_retryable());
        assert_eq!(hook.calls(), attempt);
    }

    let stored: Unit = engine.store().snapshot("default", "web").unwrap();
    assert!(stored.metadata.deletion_timestamp.is_some());
    assert_eq!(stored.finalizers(), &[DEFAULT_FINALIZER.to_string()]);
    assert_eq!(engine.store().count::<StatefulSet>(), 1);
    assert!(engine.store().writes().is_empty());
    let failures = engine
        .store()
        .notices()
        .iter()
        .filter(|(_, notice)| notice.reason == "PreDeleteFailed")
        .count();
    assert_eq!(failures, 3);

    hook.fail.store(false, Ordering::SeqCst);
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Released);
    assert!(engine.store().snapshot::<Unit>("default", "web").is_none());
    assert_eq!(engine.store().count::<StatefulSet>(), 0);
}

/// A deleted Unit whose spec became invalid is still released.
#[tokio::test]
async fn test_invalid_spec_does_not_block_deletion() {
    let unit = UnitBuilder::new("web")
        .no_containers()
        .finalizer(DEFAULT_FINALIZER)
        .build();
    let (engine, _, hook) = engine_with(&unit);
    engine.store().request_deletion::<Unit>("default", "web").unwrap();

    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Released);
    assert_eq!(hook.calls(), 1);
}
