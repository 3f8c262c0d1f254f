//! Service generation for Units.
//!
//! Creates a ClusterIP Service named after the Unit that selects the Unit's
//! pods. Status reporting probes every declared port against the cluster IP
//! and copies the first address subset of the companion Endpoints object.

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Endpoints, Service, ServiceSpec};
use kube::ResourceExt;
use tracing::debug;

use crate::controller::error::Result;
use crate::crd::{
    OwnService, ServicePortStatus, Unit, UnitRelationEndpointStatus, UnitRelationServiceStatus,
};
use crate::probe::PortProbe;
use crate::resources::adapter::{OwnedResource, StatusFragment};
use crate::resources::common::{child_metadata, fill, selector_labels, unit_namespace};
use crate::store::ResourceStore;

/// Adapter for `relationResource.service`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceAdapter {
    spec: OwnService,
}

impl ServiceAdapter {
    pub fn new(spec: OwnService) -> Self {
        Self { spec }
    }
}

/// Endpoint entries from the first subset, or `None` when it has no addresses.
///
/// Later subsets are not consulted even when the first one is empty.
fn first_subset_addresses(endpoints: &Endpoints) -> Option<Vec<UnitRelationEndpointStatus>> {
    let addresses = endpoints.subsets.as_ref()?.first()?.addresses.as_ref()?;
    Some(
        addresses
            .iter()
            .map(|address| UnitRelationEndpointStatus {
                pod_name: address.hostname.clone().unwrap_or_default(),
                pod_ip: address.ip.clone(),
                node_name: address.node_name.clone().unwrap_or_default(),
            })
            .collect(),
    )
}

#[async_trait]
impl OwnedResource for ServiceAdapter {
    type Object = Service;

    fn make(&self, unit: &Unit) -> Result<Service> {
        Ok(Service {
            metadata: child_metadata(unit),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                cluster_ip: self.spec.cluster_ip.clone().filter(|ip| !ip.is_empty()),
                selector: Some(selector_labels(unit)),
                ports: Some(self.spec.ports.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn carry_forward(&self, observed: &Service, desired: &mut Service) {
        let (Some(observed), Some(desired)) = (observed.spec.as_ref(), desired.spec.as_mut()) else {
            return;
        };
        // Allocated by the API server after creation
        fill(&mut desired.cluster_ip, &observed.cluster_ip);
        fill(&mut desired.cluster_ips, &observed.cluster_ips);
        fill(&mut desired.session_affinity, &observed.session_affinity);
        fill(&mut desired.ip_families, &observed.ip_families);
        fill(&mut desired.ip_family_policy, &observed.ip_family_policy);
        fill(&mut desired.internal_traffic_policy, &observed.internal_traffic_policy);

        if let (Some(want), Some(have)) = (desired.ports.as_mut(), observed.ports.as_ref()) {
            for (wp, hp) in want.iter_mut().zip(have) {
                if wp.port != hp.port {
                    continue;
                }
                fill(&mut wp.protocol, &hp.protocol);
                fill(&mut wp.target_port, &hp.target_port);
                fill(&mut wp.node_port, &hp.node_port);
            }
        }
    }

    fn same_spec(&self, desired: &Service, observed: &Service) -> bool {
        desired.spec == observed.spec
    }

    async fn update_status<S, P>(&self, unit: &Unit, store: &S, probe: &P) -> Result<StatusFragment>
    where
        S: ResourceStore,
        P: PortProbe,
    {
        let namespace = unit_namespace(unit);
        let name = unit.name_any();
        let svc: Service = store.get(&namespace, &name).await?;
        let spec = svc.spec.unwrap_or_default();
        let cluster_ip = spec.cluster_ip.clone().unwrap_or_default();
        let ports = spec.ports.unwrap_or_default();

        // join_all yields results in input order regardless of completion order
        let health = join_all(ports.iter().map(|port| {
            let protocol = port.protocol.as_deref().unwrap_or("TCP");
            probe.probe(protocol, &cluster_ip, port.port)
        }))
        .await;

        let service = UnitRelationServiceStatus {
            r#type: spec.type_,
            cluster_ip: spec.cluster_ip,
            ports: ports
                .into_iter()
                .zip(health)
                .map(|(service_port, health)| ServicePortStatus {
                    service_port,
                    health,
                })
                .collect(),
        };

        let endpoints = match store.get_opt::<Endpoints>(&namespace, &name).await? {
            Some(endpoints) => first_subset_addresses(&endpoints),
            None => {
                debug!(%namespace, %name, "No endpoints object for service");
                Some(Vec::new())
            }
        };

        Ok(StatusFragment::Service { service, endpoints })
    }
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
    use crate::crd::{UnitRelationResource, UnitSpec};
    use crate::resources::adapter::ApplyOutcome;
    use crate::store::MemoryStore;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset, ServicePort};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::HashSet;

    /// Reports exactly the listed ports as reachable.
    struct OpenPorts(HashSet<i32>);

    #[async_trait]
    impl PortProbe for OpenPorts {
        async fn probe(&self, _protocol: &str, _address: &str, port: i32) -> bool {
            self.0.contains(&port)
        }
    }

    fn port(name: &str, number: i32) -> ServicePort {
        ServicePort {
            name: Some(name.to_string()),
            port: number,
            ..Default::default()
        }
    }

    fn test_unit(ports: Vec<ServicePort>) -> (Unit, ServiceAdapter) {
        let own = OwnService {
            ports,
            cluster_ip: None,
        };
        let mut unit = Unit::new(
            "web",
            UnitSpec {
                relation_resource: UnitRelationResource {
                    service: Some(own.clone()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        unit.metadata.namespace = Some("default".to_string());
        (unit, ServiceAdapter::new(own))
    }

    fn endpoints_object(subsets: Vec<EndpointSubset>) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            subsets: Some(subsets),
        }
    }

    fn address(host: &str, ip: &str) -> EndpointAddress {
        EndpointAddress {
            hostname: Some(host.to_string()),
            ip: ip.to_string(),
            node_name: Some("node-a".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_make_service() {
        let (unit, adapter) = test_unit(vec![port("http", 80)]);
        let svc = adapter.make(&unit).unwrap();

        assert_eq!(svc.metadata.name.as_deref(), Some("web"));
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        assert_eq!(spec.cluster_ip, None);
        assert_eq!(spec.selector.unwrap().get("app"), Some(&"web".to_string()));
        assert_eq!(spec.ports.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_keeps_allocated_cluster_ip() {
        let store = MemoryStore::new().with_cluster_ip("10.96.0.42");
        let (unit, adapter) = test_unit(vec![port("http", 80)]);

        assert_eq!(adapter.apply(&unit, &store).await.unwrap(), ApplyOutcome::Created);
        assert_eq!(adapter.apply(&unit, &store).await.unwrap(), ApplyOutcome::Unchanged);

        let stored: Service = store.snapshot("default", "web").unwrap();
        assert_eq!(stored.spec.unwrap().cluster_ip.as_deref(), Some("10.96.0.42"));
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_port_health_is_independent_and_ordered() {
        let store = MemoryStore::new();
        let (unit, adapter) = test_unit(vec![port("metrics", 9090), port("http", 80)]);
        adapter.apply(&unit, &store).await.unwrap();

        let probe = OpenPorts(HashSet::from([80]));
        let StatusFragment::Service { service, .. } =
            adapter.update_status(&unit, &store, &probe).await.unwrap()
        else {
            panic!("expected a Service fragment");
        };

        let observed: Vec<(i32, bool)> = service
            .ports
            .iter()
            .map(|p| (p.service_port.port, p.health))
            .collect();
        assert_eq!(observed, vec![(9090, false), (80, true)]);
        assert_eq!(service.ports[1].service_port.protocol.as_deref(), Some("TCP"));
    }

    #[tokio::test]
    async fn test_endpoints_first_subset_only() {
        let store = MemoryStore::new();
        let (unit, adapter) = test_unit(vec![port("http", 80)]);
        adapter.apply(&unit, &store).await.unwrap();
        store
            .seed(&endpoints_object(vec![
                EndpointSubset {
                    addresses: Some(vec![address("web-0", "10.1.0.1")]),
                    ..Default::default()
                },
                EndpointSubset {
                    addresses: Some(vec![address("web-1", "10.1.0.2")]),
                    ..Default::default()
                },
            ]))
            .unwrap();

        let StatusFragment::Service { endpoints, .. } = adapter
            .update_status(&unit, &store, &OpenPorts(HashSet::new()))
            .await
            .unwrap()
        else {
            panic!("expected a Service fragment");
        };
        let endpoints = endpoints.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].pod_name, "web-0");
        assert_eq!(endpoints[0].node_name, "node-a");
    }

    #[tokio::test]
    async fn test_endpoints_missing_or_empty() {
        let store = MemoryStore::new();
        let (unit, adapter) = test_unit(vec![port("http", 80)]);
        adapter.apply(&unit, &store).await.unwrap();
        let probe = OpenPorts(HashSet::new());

        let StatusFragment::Service { endpoints, .. } =
            adapter.update_status(&unit, &store, &probe).await.unwrap()
        else {
            panic!("expected a Service fragment");
        };
        assert_eq!(endpoints, Some(Vec::new()));

        store
            .seed(&endpoints_object(vec![EndpointSubset::default()]))
            .unwrap();
        let StatusFragment::Service { endpoints, .. } =
            adapter.update_status(&unit, &store, &probe).await.unwrap()
        else {
            panic!("expected a Service fragment");
        };
        assert_eq!(endpoints, None);
    }
}
