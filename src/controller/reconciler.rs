//! Reconciliation loop for Unit.
//!
//! [`ReconcileEngine::reconcile`] runs one level-triggered pass for a Unit key:
//!
//! 1. fetch the Unit (gone means done)
//! 2. validate the Unit spec unless deletion was requested
//! 3. pass the finalizer gate (may defer or release)
//! 4. apply every resolved adapter, recording failures without stopping
//! 5. read back every adapter's status and aggregate it
//! 6. write the status only when the observation changed
//!
//! [`reconcile`] and [`error_policy`] adapt the engine to kube-runtime's
//! `Controller`, which owns scheduling, backoff and per-key serialization.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, error, info, warn};

use crate::controller::context::Context;
use crate::controller::error::{AdapterFailures, AdapterStep, Error, Result};
use crate::controller::finalizer::{FinalizerLifecycle, Gate, NoopPreDelete, PreDeleteHook};
use crate::controller::status::StatusAggregator;
use crate::controller::validation::validate_spec;
use crate::crd::Unit;
use crate::probe::{PortProbe, TcpProbe};
use crate::resources::common::unit_namespace;
use crate::resources::workload::desired_replicas;
use crate::resources::{ApplyOutcome, resolve_adapters};
use crate::store::{Notice, ResourceStore};

/// Requeue interval once a Unit is fully ready
const READY_REQUEUE: Duration = Duration::from_secs(60);
/// Requeue interval while replicas are still coming up
const PROGRESSING_REQUEUE: Duration = Duration::from_secs(10);

/// Result of one successful pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The Unit no longer exists
    Gone,
    /// The finalizer was just registered; nothing else was done
    Deferred,
    /// The Unit is being deleted and has been let go
    Released,
    /// Owned resources were applied and status refreshed
    Synced {
        status_written: bool,
        desired_replicas: i32,
        ready_replicas: i32,
    },
}

/// Drives Units toward their declared state.
pub struct ReconcileEngine<S, P = TcpProbe, H = NoopPreDelete> {
    store: S,
    probe: P,
    finalizer: FinalizerLifecycle<H>,
}

impl<S: ResourceStore> ReconcileEngine<S> {
    /// Engine with the socket probe and no pre-delete work.
    pub fn with_defaults(store: S) -> Self {
        Self::new(store, TcpProbe::default(), FinalizerLifecycle::default())
    }
}

impl<S, P, H> ReconcileEngine<S, P, H>
where
    S: ResourceStore,
    P: PortProbe,
    H: PreDeleteHook,
{
    pub fn new(store: S, probe: P, finalizer: FinalizerLifecycle<H>) -> Self {
        Self {
            store,
            probe,
            finalizer,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn finalizer(&self) -> &FinalizerLifecycle<H> {
        &self.finalizer
    }

    /// Run one reconcile pass for `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let unit: Unit = match self.store.get(namespace, name).await {
            Ok(unit) => unit,
            Err(e) if e.is_not_found() => {
                debug!(%namespace, %name, "Unit not found, nothing to do");
                return Ok(ReconcileOutcome::Gone);
            }
            Err(e) => return Err(e),
        };

        // A Unit being deleted is released even if its spec became invalid
        if unit.metadata.deletion_timestamp.is_none() {
            if let Err(e) = validate_spec(&unit) {
                error!(%namespace, %name, error = %e, "Validation failed");
                self.store
                    .publish_notice(
                        &unit,
                        Notice::warning("ValidationFailed", "Validating", e.to_string()),
                    )
                    .await;
                return Err(e);
            }
        }

        match self.finalizer.gate(&unit, &self.store).await? {
            Gate::Proceed => {}
            Gate::Defer => return Ok(ReconcileOutcome::Deferred),
            Gate::Released => return Ok(ReconcileOutcome::Released),
        }

        let adapters = resolve_adapters(&unit.spec);
        let mut failures = AdapterFailures::default();

        for adapter in &adapters {
            match adapter.apply(&unit, &self.store).await {
                Ok(ApplyOutcome::Created) => {
                    self.store
                        .publish_notice(
                            &unit,
                            Notice::normal(
                                "Created",
                                "Apply",
                                format!("Created {} {}", adapter.kind(), name),
                            ),
                        )
                        .await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(%namespace, %name, kind = adapter.kind(), error = %e, "Apply failed");
                    failures.push(adapter.kind(), AdapterStep::Apply, e);
                }
            }
        }

        let mut aggregator = StatusAggregator::new(unit.status.as_ref(), &adapters);
        for adapter in &adapters {
            match adapter.update_status(&unit, &self.store, &self.probe).await {
                Ok(fragment) => aggregator.merge(fragment),
                Err(e) => {
                    warn!(%namespace, %name, kind = adapter.kind(), error = %e, "Status read failed");
                    failures.push(adapter.kind(), AdapterStep::UpdateStatus, e);
                }
            }
        }

        let desired = desired_replicas(&unit);
        let ready = aggregator.ready_replicas();
        let status = aggregator.finish(desired, &failures, unit.metadata.generation);
        let status_written = self.persist_status(&unit, status).await?;

        if !failures.is_empty() {
            self.store
                .publish_notice(
                    &unit,
                    Notice::warning("ReconcileFailed", "Reconciling", failures.to_string()),
                )
                .await;
            return Err(Error::Adapters(failures));
        }

        Ok(ReconcileOutcome::Synced {
            status_written,
            desired_replicas: desired,
            ready_replicas: ready,
        })
    }

    /// Write `status` if it differs from the persisted one in anything but
    /// `lastUpdateTime`. Returns whether a write happened.
    async fn persist_status(&self, unit: &Unit, mut status: crate::crd::UnitStatus) -> Result<bool> {
        let previous = unit.status.clone().unwrap_or_default();
        if status.same_observation(&previous) {
            debug!(name = %unit.name_any(), "Status unchanged");
            return Ok(false);
        }

        status.last_update_time = Some(jiff::Timestamp::now().to_string());
        let mut updated = unit.clone();
        updated.status = Some(status);
        self.store
            .replace_status(&unit_namespace(unit), &updated)
            .await?;
        info!(name = %unit.name_any(), namespace = %unit_namespace(unit), "Status updated");
        Ok(true)
    }
}

/// Reconcile a Unit
///
/// This is the reconcile function handed to the kube-runtime controller.
pub async fn reconcile(unit: Arc<Unit>, ctx: Arc<Context>) -> Result<Action> {
    let start_time = Instant::now();
    let name = unit.name_any();
    let namespace = unit_namespace(&unit);

    debug!(name = %name, namespace = %namespace, "Reconciling Unit");

    let outcome = ctx.engine.reconcile(&namespace, &name).await?;

    if let Some(ref health_state) = ctx.health_state {
        let duration = start_time.elapsed().as_secs_f64();
        health_state
            .metrics
            .record_reconcile(&namespace, &name, duration);
        health_state.touch();
        if let ReconcileOutcome::Synced {
            desired_replicas,
            ready_replicas,
            ..
        } = outcome
        {
            health_state.metrics.set_unit_replicas(
                &namespace,
                &name,
                i64::from(desired_replicas),
                i64::from(ready_replicas),
            );
        } else {
            health_state.metrics.forget_unit(&namespace, &name);
        }
    }

    Ok(match outcome {
        ReconcileOutcome::Deferred => Action::requeue(ctx.defer_requeue),
        ReconcileOutcome::Gone | ReconcileOutcome::Released => Action::await_change(),
        ReconcileOutcome::Synced {
            desired_replicas,
            ready_replicas,
            ..
        } if ready_replicas >= desired_replicas => Action::requeue(READY_REQUEUE),
        ReconcileOutcome::Synced { .. } => Action::requeue(PROGRESSING_REQUEUE),
    })
}

/// Error policy for the controller
pub fn error_policy(unit: Arc<Unit>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = unit.name_any();
    let namespace = unit_namespace(&unit);

    if let Some(ref health_state) = ctx.health_state {
        health_state.metrics.record_error(&namespace, &name);
        if let Error::Adapters(failures) = error {
            for failure in failures.iter() {
                health_state
                    .metrics
                    .record_adapter_failure(failure.kind, &failure.step.to_string());
            }
        }
    }

    if error.is_retryable() {
        warn!(name = %name, error = %error, "Retryable error, will retry");
    } else {
        error!(name = %name, error = %error, "Non-retryable error");
    }
    Action::requeue(error.requeue_after())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::controller::finalizer::DEFAULT_FINALIZER;
    use crate::crd::UnitSpec;
    use crate::store::{MemoryStore, Verb};
    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};

    struct Closed;

    #[async_trait]
    impl PortProbe for Closed {
        async fn probe(&self, _: &str, _: &str, _: i32) -> bool {
            false
        }
    }

    fn engine(store: MemoryStore) -> ReconcileEngine<MemoryStore, Closed> {
        ReconcileEngine::new(store, Closed, FinalizerLifecycle::default())
    }

    fn seed_unit(store: &MemoryStore, containers: usize) {
        let mut unit = Unit::new(
            "web",
            UnitSpec {
                replicas: Some(2),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: (0..containers)
                            .map(|i| Container {
                                name: format!("c{}", i),
                                ..Default::default()
                            })
                            .collect(),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        unit.metadata.namespace = Some("default".to_string());
        store.seed(&unit).unwrap();
    }

    #[tokio::test]
    async fn test_missing_unit_is_gone() {
        let engine = engine(MemoryStore::new());
        assert_eq!(
            engine.reconcile("default", "web").await.unwrap(),
            ReconcileOutcome::Gone
        );
    }

    #[tokio::test]
    async fn test_first_pass_only_registers_finalizer() {
        let store = MemoryStore::new();
        seed_unit(&store, 1);
        let engine = engine(store);

        assert_eq!(
            engine.reconcile("default", "web").await.unwrap(),
            ReconcileOutcome::Deferred
        );
        let writes = engine.store().writes();
        assert_eq!(writes.len(), 1);
        assert_eq!((writes[0].kind.as_str(), writes[0].verb), ("Unit", Verb::Replace));
        assert_eq!(engine.store().count::<StatefulSet>(), 0);
    }

    #[tokio::test]
    async fn test_second_pass_creates_and_reports() {
        let store = MemoryStore::new();
        seed_unit(&store, 1);
        let engine = engine(store);
        engine.reconcile("default", "web").await.unwrap();

        let outcome = engine.reconcile("default", "web").await.unwrap();
        assert!(
            matches!(
                outcome,
                ReconcileOutcome::Synced {
                    status_written: true,
                    desired_replicas: 2,
                    ..
                }
            ),
            "unexpected outcome {:?}",
            outcome
        );

        let unit: Unit = engine.store().snapshot("default", "web").unwrap();
        assert!(unit.finalizers().contains(&DEFAULT_FINALIZER.to_string()));
        let status = unit.status.unwrap();
        assert!(status.base_stateful_set.is_none_or(|s| s.replicas == 0));
        assert!(status.last_update_time.is_some());
    }

    #[tokio::test]
    async fn test_invalid_spec_writes_nothing() {
        let store = MemoryStore::new();
        seed_unit(&store, 0);
        let engine = engine(store);

        let err = engine.reconcile("default", "web").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!err.is_retryable());
        assert!(engine.store().writes().is_empty());
        assert_eq!(engine.store().notices()[0].1.reason, "ValidationFailed");
    }
}
