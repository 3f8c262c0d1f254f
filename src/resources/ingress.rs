//! Ingress generation for Units.

use async_trait::async_trait;
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{OwnIngress, Unit};
use crate::probe::PortProbe;
use crate::resources::adapter::{OwnedResource, StatusFragment};
use crate::resources::common::{child_metadata, fill, unit_namespace};
use crate::store::ResourceStore;

/// Adapter for `relationResource.ingress`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IngressAdapter {
    spec: OwnIngress,
}

impl IngressAdapter {
    pub fn new(spec: OwnIngress) -> Self {
        Self { spec }
    }
}

fn non_empty<T: Clone>(items: &[T]) -> Option<Vec<T>> {
    (!items.is_empty()).then(|| items.to_vec())
}

#[async_trait]
impl OwnedResource for IngressAdapter {
    type Object = Ingress;

    fn make(&self, unit: &Unit) -> Result<Ingress> {
        Ok(Ingress {
            metadata: child_metadata(unit),
            spec: Some(IngressSpec {
                ingress_class_name: self.spec.ingress_class_name.clone(),
                rules: non_empty(&self.spec.rules),
                tls: non_empty(&self.spec.tls),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn carry_forward(&self, observed: &Ingress, desired: &mut Ingress) {
        // The default IngressClass admission plugin fills the class in
        if let (Some(observed), Some(desired)) = (observed.spec.as_ref(), desired.spec.as_mut()) {
            fill(&mut desired.ingress_class_name, &observed.ingress_class_name);
        }
    }

    fn same_spec(&self, desired: &Ingress, observed: &Ingress) -> bool {
        desired.spec == observed.spec
    }

    async fn update_status<S, P>(&self, unit: &Unit, store: &S, _probe: &P) -> Result<StatusFragment>
    where
        S: ResourceStore,
        P: PortProbe,
    {
        let ingress: Ingress = store.get(&unit_namespace(unit), &unit.name_any()).await?;
        Ok(StatusFragment::Ingress(ingress.status))
    }
}
