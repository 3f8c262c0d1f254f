//! End-to-end passes covering service health, endpoints, pods and readiness.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, Pod, PodCondition, PodSpec, PodStatus, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use unit_operator::controller::finalizer::{DEFAULT_FINALIZER, FinalizerLifecycle};
use unit_operator::controller::reconciler::{ReconcileEngine, ReconcileOutcome};
use unit_operator::controller::status::is_condition_true;
use unit_operator::crd::{CONDITION_READY, Unit, UnitStatus};
use unit_operator::probe::TcpProbe;
use unit_operator::store::MemoryStore;

use crate::common::fixtures::{UnitBuilder, engine_with};
use crate::settle;

fn stored_status(store: &MemoryStore, name: &str) -> UnitStatus {
    let unit: Unit = store.snapshot("default", name).unwrap();
    unit.status.expect("status written")
}

fn port_health(status: &UnitStatus) -> Vec<(i32, Option<String>, bool)> {
    status
        .relation_resource_status
        .service
        .as_ref()
        .map(|svc| {
            svc.ports
                .iter()
                .map(|p| (p.service_port.port, p.service_port.protocol.clone(), p.health))
                .collect()
        })
        .unwrap_or_default()
}

/// StatefulSet of three behind one TCP port: health follows the listener.
#[tokio::test]
async fn test_statefulset_with_single_port() {
    let unit = UnitBuilder::new("web")
        .replicas(3)
        .service_port("http", 80, "TCP")
        .build();
    let (engine, probe, _) = engine_with(&unit);
    settle(&engine, "web").await;

    let sts: StatefulSet = engine.store().snapshot("default", "web").unwrap();
    assert_eq!(sts.spec.unwrap().replicas, Some(3));
    let svc: Service = engine.store().snapshot("default", "web").unwrap();
    let ports = svc.spec.unwrap().ports.unwrap();
    assert_eq!(ports.len(), 1);
    assert_eq!(ports[0].port, 80);

    let status = stored_status(engine.store(), "web");
    assert_eq!(port_health(&status), vec![(80, Some("TCP".to_string()), false)]);

    probe.open(80);
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Synced {
            status_written: true,
            ..
        }
    ));
    let status = stored_status(engine.store(), "web");
    assert_eq!(port_health(&status), vec![(80, Some("TCP".to_string()), true)]);
}

/// Same flow against a real socket on the loopback address.
#[tokio::test]
async fn test_real_listener_flips_health() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = i32::from(listener.local_addr().unwrap().port());
    drop(listener);

    let unit = UnitBuilder::new("web")
        .finalizer(DEFAULT_FINALIZER)
        .service_port("app", port, "TCP")
        .build();
    let store = MemoryStore::new().with_cluster_ip("127.0.0.1");
    store.seed(&unit).unwrap();
    let engine = ReconcileEngine::new(store, TcpProbe::default(), FinalizerLifecycle::default());

    engine.reconcile("default", "web").await.unwrap();
    let status = stored_status(engine.store(), "web");
    assert_eq!(port_health(&status), vec![(port, Some("TCP".to_string()), false)]);

    let addr = format!("127.0.0.1:{}", port);
    let _listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    engine.reconcile("default", "web").await.unwrap();
    let status = stored_status(engine.store(), "web");
    assert_eq!(port_health(&status), vec![(port, Some("TCP".to_string()), true)]);
}

/// Each port is probed on its own; results stay in declaration order.
#[tokio::test]
async fn test_port_health_is_independent() {
    let unit = UnitBuilder::new("web")
        .service_port("http", 80, "TCP")
        .service_port("metrics", 9090, "TCP")
        .service_port("dns", 53, "UDP")
        .build();
    let (engine, probe, _) = engine_with(&unit);
    probe.open(9090);
    settle(&engine, "web").await;

    let status = stored_status(engine.store(), "web");
    assert_eq!(
        port_health(&status),
        vec![
            (80, Some("TCP".to_string()), false),
            (9090, Some("TCP".to_string()), true),
            (53, Some("UDP".to_string()), false),
        ]
    );
    assert_eq!(probe.calls(), 3);

    probe.close(9090);
    probe.open(80);
    engine.reconcile("default", "web").await.unwrap();
    let health: Vec<bool> = port_health(&stored_status(engine.store(), "web"))
        .into_iter()
        .map(|(_, _, h)| h)
        .collect();
    assert_eq!(health, vec![true, false, false]);
}

fn pod(name: &str, phase: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-a".to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            pod_ip: Some(format!("10.1.0.{}", name.len())),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

fn endpoints(addresses: Option<Vec<(&str, &str)>>) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: addresses.map(|addrs| {
                addrs
                    .into_iter()
                    .map(|(host, ip)| EndpointAddress {
                        hostname: Some(host.to_string()),
                        ip: ip.to_string(),
                        node_name: Some("node-a".to_string()),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }]),
    }
}

/// Live pods are reported sorted by name; terminated ones are left out.
#[tokio::test]
async fn test_pods_and_endpoints_reported() {
    let unit = UnitBuilder::new("web")
        .replicas(2)
        .service_port("http", 80, "TCP")
        .build();
    let (engine, _, _) = engine_with(&unit);
    let store = engine.store();
    store.seed(&pod("web-1", "Running", true)).unwrap();
    store.seed(&pod("web-0", "Running", false)).unwrap();
    store.seed(&pod("web-old", "Failed", false)).unwrap();
    store
        .seed(&endpoints(Some(vec![("web-1", "10.1.0.5")])))
        .unwrap();
    settle(&engine, "web").await;

    let status = stored_status(engine.store(), "web");
    let pods: Vec<(&str, bool)> = status
        .pods
        .iter()
        .map(|p| (p.name.as_str(), p.ready))
        .collect();
    assert_eq!(pods, vec![("web-0", false), ("web-1", true)]);

    let endpoint = &status.relation_resource_status.endpoint;
    assert_eq!(endpoint.len(), 1);
    assert_eq!(endpoint[0].pod_name, "web-1");
    assert_eq!(endpoint[0].pod_ip, "10.1.0.5");
    assert_eq!(endpoint[0].node_name, "node-a");

    // A first subset without addresses keeps the last observation
    engine.store().seed(&endpoints(None)).unwrap();
    engine.reconcile("default", "web").await.unwrap();
    let status = stored_status(engine.store(), "web");
    assert_eq!(status.relation_resource_status.endpoint.len(), 1);
}

/// Ready flips once the workload reports every replica ready.
#[tokio::test]
async fn test_ready_condition_follows_workload() {
    let unit = UnitBuilder::new("web").replicas(3).build();
    let (engine, _, _) = engine_with(&unit);
    let outcome = settle(&engine, "web").await;
    assert!(matches!(
        outcome,
        ReconcileOutcome::Synced {
            desired_replicas: 3,
            ready_replicas: 0,
            ..
        }
    ));
    let status = stored_status(engine.store(), "web");
    assert!(!is_condition_true(&status.conditions, CONDITION_READY));

    engine
        .store()
        .modify::<StatefulSet>("default", "web", |sts| {
            sts.status = Some(StatefulSetStatus {
                replicas: 3,
                ready_replicas: Some(3),
                ..Default::default()
            });
        })
        .unwrap();
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Synced {
            status_written: true,
            ready_replicas: 3,
            ..
        }
    ));

    let status = stored_status(engine.store(), "web");
    assert!(is_condition_true(&status.conditions, CONDITION_READY));
    assert_eq!(status.base_stateful_set.unwrap().ready_replicas, Some(3));
    assert!(status.last_update_time.is_some());
}

/// Dropping the Service from the spec removes its status slot and endpoints.
#[tokio::test]
async fn test_removed_service_clears_status_slot() {
    let unit = UnitBuilder::new("web")
        .service_port("http", 80, "TCP")
        .pvc("1Gi")
        .build();
    let (engine, _, _) = engine_with(&unit);
    engine
        .store()
        .seed(&endpoints(Some(vec![("web-0", "10.1.0.5")])))
        .unwrap();
    settle(&engine, "web").await;

    let status = stored_status(engine.store(), "web");
    assert!(status.relation_resource_status.service.is_some());
    assert_eq!(status.relation_resource_status.endpoint.len(), 1);

    engine
        .store()
        .modify::<Unit>("default", "web", |unit| {
            unit.spec.relation_resource.service = None;
        })
        .unwrap();
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Synced {
            status_written: true,
            ..
        }
    ));

    let status = stored_status(engine.store(), "web");
    assert!(status.relation_resource_status.service.is_none());
    assert!(status.relation_resource_status.endpoint.is_empty());

    // The cleared slot stays cleared, so the next pass has nothing to write
    let outcome = engine.reconcile("default", "web").await.unwrap();
    assert!(matches!(
        outcome,
        ReconcileOutcome::Synced {
            status_written: false,
            ..
        }
    ));
}
