//! Adapter contract shared by every managed sub-resource kind.
//!
//! Each adapter knows how to build the desired object for a Unit, look up the
//! live object, converge the two, and read back a status fragment. The set of
//! adapters for one Unit is closed: a primary workload chosen by `category`,
//! followed by one adapter per populated `relationResource` entry.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DeploymentStatus, StatefulSetStatus};
use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
use k8s_openapi::api::networking::v1::IngressStatus;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use crate::controller::error::Result;
use crate::crd::{
    Unit, UnitCategory, UnitPodStatus, UnitRelationEndpointStatus, UnitRelationServiceStatus,
    UnitSpec,
};
use crate::probe::PortProbe;
use crate::resources::common::unit_namespace;
use crate::resources::ingress::IngressAdapter;
use crate::resources::pvc::PvcAdapter;
use crate::resources::services::ServiceAdapter;
use crate::resources::workload::{DeploymentAdapter, StatefulSetAdapter};
use crate::store::{ResourceStore, StoreObject};

/// What `apply` did to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Observed status of one adapter, merged into `UnitStatus` by the aggregator.
#[derive(Clone, Debug, PartialEq)]
pub enum StatusFragment {
    StatefulSet {
        status: Option<StatefulSetStatus>,
        pods: Vec<UnitPodStatus>,
    },
    Deployment {
        status: Option<DeploymentStatus>,
        pods: Vec<UnitPodStatus>,
    },
    Service {
        service: UnitRelationServiceStatus,
        /// `None` when the endpoints object has no usable first subset
        endpoints: Option<Vec<UnitRelationEndpointStatus>>,
    },
    Ingress(Option<IngressStatus>),
    Pvc(Option<PersistentVolumeClaimStatus>),
}

/// Make/Exists/Apply/UpdateStatus contract for one owned object kind.
#[async_trait]
pub trait OwnedResource: Send + Sync {
    type Object: StoreObject;

    /// Build the desired object. Pure function of the Unit's spec.
    fn make(&self, unit: &Unit) -> Result<Self::Object>;

    /// Copy server-assigned fields from the live object into `desired`.
    fn carry_forward(&self, observed: &Self::Object, desired: &mut Self::Object);

    /// Structural comparison of the parts this adapter owns.
    fn same_spec(&self, desired: &Self::Object, observed: &Self::Object) -> bool;

    /// Read back the status fragment for this adapter.
    async fn update_status<S, P>(&self, unit: &Unit, store: &S, probe: &P) -> Result<StatusFragment>
    where
        S: ResourceStore,
        P: PortProbe;

    /// Look up the live object named after the Unit. Not found is `Ok(None)`.
    async fn exists<S: ResourceStore>(&self, unit: &Unit, store: &S) -> Result<Option<Self::Object>> {
        store.get_opt(&unit_namespace(unit), &unit.name_any()).await
    }

    /// Create the object if missing, update it if it drifted, otherwise do nothing.
    async fn apply<S: ResourceStore>(&self, unit: &Unit, store: &S) -> Result<ApplyOutcome> {
        let namespace = unit_namespace(unit);
        let name = unit.name_any();
        let kind = Self::Object::kind(&());
        let mut desired = self.make(unit)?;

        let Some(observed) = self.exists(unit, store).await? else {
            info!(%kind, %namespace, %name, "Creating owned resource");
            store.create(&namespace, &desired).await?;
            return Ok(ApplyOutcome::Created);
        };

        self.carry_forward(&observed, &mut desired);
        if self.same_spec(&desired, &observed) && desired.labels() == observed.labels() {
            debug!(%kind, %namespace, %name, "Owned resource up to date");
            return Ok(ApplyOutcome::Unchanged);
        }

        info!(%kind, %namespace, %name, "Updating owned resource");
        desired.meta_mut().resource_version = observed.meta().resource_version.clone();
        store.replace(&namespace, &desired).await?;
        Ok(ApplyOutcome::Updated)
    }
}

/// Closed set of adapters a Unit can resolve to.
#[derive(Clone, Debug, PartialEq)]
pub enum UnitAdapter {
    StatefulSet(StatefulSetAdapter),
    Deployment(DeploymentAdapter),
    Service(ServiceAdapter),
    Ingress(IngressAdapter),
    Pvc(PvcAdapter),
}

impl UnitAdapter {
    /// Kind of the object this adapter manages.
    pub fn kind(&self) -> &'static str {
        match self {
            UnitAdapter::StatefulSet(_) => "StatefulSet",
            UnitAdapter::Deployment(_) => "Deployment",
            UnitAdapter::Service(_) => "Service",
            UnitAdapter::Ingress(_) => "Ingress",
            UnitAdapter::Pvc(_) => "PersistentVolumeClaim",
        }
    }

    pub async fn apply<S: ResourceStore>(&self, unit: &Unit, store: &S) -> Result<ApplyOutcome> {
        match self {
            UnitAdapter::StatefulSet(a) => a.apply(unit, store).await,
            UnitAdapter::Deployment(a) => a.apply(unit, store).await,
            UnitAdapter::Service(a) => a.apply(unit, store).await,
            UnitAdapter::Ingress(a) => a.apply(unit, store).await,
            UnitAdapter::Pvc(a) => a.apply(unit, store).await,
        }
    }

    pub async fn update_status<S, P>(&self, unit: &Unit, store: &S, probe: &P) -> Result<StatusFragment>
    where
        S: ResourceStore,
        P: PortProbe,
    {
        match self {
            UnitAdapter::StatefulSet(a) => a.update_status(unit, store, probe).await,
            UnitAdapter::Deployment(a) => a.update_status(unit, store, probe).await,
            UnitAdapter::Service(a) => a.update_status(unit, store, probe).await,
            UnitAdapter::Ingress(a) => a.update_status(unit, store, probe).await,
            UnitAdapter::Pvc(a) => a.update_status(unit, store, probe).await,
        }
    }
}

/// Resolve the ordered adapter set: primary workload, then Service, Ingress, PVC.
pub fn resolve_adapters(spec: &UnitSpec) -> Vec<UnitAdapter> {
    let mut adapters = vec![match spec.category {
        UnitCategory::StatefulSet => UnitAdapter::StatefulSet(StatefulSetAdapter),
        UnitCategory::Deployment => UnitAdapter::Deployment(DeploymentAdapter),
    }];

    let relation = &spec.relation_resource;
    if let Some(service) = &relation.service {
        adapters.push(UnitAdapter::Service(ServiceAdapter::new(service.clone())));
    }
    if let Some(ingress) = &relation.ingress {
        adapters.push(UnitAdapter::Ingress(IngressAdapter::new(ingress.clone())));
    }
    if let Some(pvc) = &relation.pvc {
        adapters.push(UnitAdapter::Pvc(PvcAdapter::new(pvc.clone())));
    }
    adapters
}
