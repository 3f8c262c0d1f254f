//! PersistentVolumeClaim generation for Units.
//!
//! The claim spec is applied verbatim. Binding fills in `volumeName`, and the
//! API server defaults the storage class and volume mode; all three are
//! carried forward so a bound claim is never rewritten.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;

use crate::controller::error::Result;
use crate::crd::{OwnPvc, Unit};
use crate::probe::PortProbe;
use crate::resources::adapter::{OwnedResource, StatusFragment};
use crate::resources::common::{child_metadata, fill, unit_namespace};
use crate::store::ResourceStore;

/// Adapter for `relationResource.pvc`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PvcAdapter {
    spec: OwnPvc,
}

impl PvcAdapter {
    pub fn new(spec: OwnPvc) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl OwnedResource for PvcAdapter {
    type Object = PersistentVolumeClaim;

    fn make(&self, unit: &Unit) -> Result<PersistentVolumeClaim> {
        Ok(PersistentVolumeClaim {
            metadata: child_metadata(unit),
            spec: Some(self.spec.spec.clone()),
            ..Default::default()
        })
    }

    fn carry_forward(&self, observed: &PersistentVolumeClaim, desired: &mut PersistentVolumeClaim) {
        let (Some(observed), Some(desired)) = (observed.spec.as_ref(), desired.spec.as_mut()) else {
            return;
        };
        fill(&mut desired.volume_name, &observed.volume_name);
        fill(&mut desired.storage_class_name, &observed.storage_class_name);
        fill(&mut desired.volume_mode, &observed.volume_mode);
    }

    fn same_spec(&self, desired: &PersistentVolumeClaim, observed: &PersistentVolumeClaim) -> bool {
        desired.spec == observed.spec
    }

    async fn update_status<S, P>(&self, unit: &Unit, store: &S, _probe: &P) -> Result<StatusFragment>
    where
        S: ResourceStore,
        P: PortProbe,
    {
        let pvc: PersistentVolumeClaim = store.get(&unit_namespace(unit), &unit.name_any()).await?;
        Ok(StatusFragment::Pvc(pvc.status))
    }
}
