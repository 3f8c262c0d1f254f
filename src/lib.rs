//! unit-operator library crate
//!
//! Exports the Unit CRD, the reconcile engine with its store and probe seams,
//! the owned-resource adapters and the kube-runtime controller wiring.

pub mod config;
pub mod controller;
pub mod crd;
pub mod health;
pub mod probe;
pub mod resources;
pub mod store;

pub use config::OperatorConfig;
pub use health::HealthState;

use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{Controller, WatchStreamExt, metadata_watcher, predicates, reflector, watcher};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use controller::{context::Context, reconciler::reconcile};
use crd::Unit;

/// Create namespaced or cluster-wide API based on scope
pub fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

fn default_watcher_config() -> WatcherConfig {
    WatcherConfig::default().any_semantic()
}

/// Reflector-backed Unit stream with backoff.
///
/// The generation predicate drops events caused by our own status writes.
fn create_filtered_stream<K>(
    api: Api<K>,
    watcher_config: WatcherConfig,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<K, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug + Send + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let stream = reflector(writer, watcher(api, watcher_config))
        .default_backoff()
        .applied_objects()
        .predicate_filter(predicates::generation);
    (reader, stream)
}

/// Run the Unit controller until its stream ends.
///
/// Watches Units in `config.watch_namespace` (cluster-wide when unset) and
/// every kind a Unit can own. Changes to an owned object requeue its Unit.
pub async fn run_controller(
    client: Client,
    config: OperatorConfig,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.as_deref();
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting controller for Unit resources"
    );

    if let Some(ref state) = health_state {
        state.set_ready(true).await;
    }

    let ctx = Arc::new(Context::new(client.clone(), &config, health_state));

    let units: Api<Unit> = scoped_api(client.clone(), namespace);
    let statefulsets: Api<StatefulSet> = scoped_api(client.clone(), namespace);
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace);
    let services: Api<Service> = scoped_api(client.clone(), namespace);
    let ingresses: Api<Ingress> = scoped_api(client.clone(), namespace);
    let pvcs: Api<PersistentVolumeClaim> = scoped_api(client.clone(), namespace);

    let watcher_config = default_watcher_config();
    let (reader, unit_stream) = create_filtered_stream(units, watcher_config.clone());

    // Workloads are watched in full since their status feeds the Unit status;
    // the other owned kinds only need change notifications.
    Controller::for_stream(unit_stream, reader)
        .owns(statefulsets, watcher_config.clone())
        .owns(deployments, watcher_config.clone())
        .owns_stream(metadata_watcher(services, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(ingresses, watcher_config.clone()).touched_objects())
        .owns_stream(metadata_watcher(pvcs, watcher_config).touched_objects())
        .run(reconcile, controller::reconciler::error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    // Watch events for children of a deleted Unit land here
                    let is_not_found = match &e {
                        kube::runtime::controller::Error::ObjectNotFound(_) => true,
                        kube::runtime::controller::Error::ReconcilerFailed(err, _) => {
                            err.is_not_found()
                        }
                        _ => false,
                    };
                    if is_not_found {
                        debug!("Object no longer exists (likely deleted): {:?}", e);
                    } else {
                        error!("Reconciliation error: {:?}", e);
                    }
                }
            }
        })
        .await;

    error!("Controller stream ended unexpectedly");
}
