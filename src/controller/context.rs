//! Shared context for the controller.
//!
//! Holds the reconcile engine wired to the live cluster, plus the optional
//! health state used for metrics.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::finalizer::{FinalizerLifecycle, NoopPreDelete};
use crate::controller::reconciler::ReconcileEngine;
use crate::health::HealthState;
use crate::probe::TcpProbe;
use crate::store::KubeStore;

/// Shared context for the controller
pub struct Context {
    pub engine: ReconcileEngine<KubeStore, TcpProbe, NoopPreDelete>,
    /// Optional health state for metrics and readiness
    pub health_state: Option<Arc<HealthState>>,
    /// Delay before the pass that follows a finalizer registration
    pub defer_requeue: Duration,
}

impl Context {
    /// Create a new context
    pub fn new(
        client: Client,
        config: &OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        let store = KubeStore::new(client, config.pod_name.clone());
        let engine = ReconcileEngine::new(
            store,
            TcpProbe::new(config.probe_timeout),
            FinalizerLifecycle::new(config.finalizer.clone(), NoopPreDelete),
        );
        Self {
            engine,
            health_state,
            defer_requeue: config.defer_requeue,
        }
    }
}
