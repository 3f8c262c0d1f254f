//! Resource generation module.
//!
//! Contains one adapter per Kubernetes kind owned by a Unit.
//!
//! ## Resources Generated
//!
//! | Resource | Source | Purpose |
//! |----------|--------|---------|
//! | StatefulSet | `category: StatefulSet` | Primary workload with stable pod identity |
//! | Deployment | `category: Deployment` | Primary workload without pod identity |
//! | Service | `relationResource.service` | ClusterIP exposure with per-port health |
//! | Ingress | `relationResource.ingress` | HTTP routing |
//! | PersistentVolumeClaim | `relationResource.pvc` | Standalone claim named after the Unit |

pub mod adapter;
pub mod common;
pub mod ingress;
pub mod pvc;
pub mod services;
pub mod workload;

pub use adapter::{ApplyOutcome, OwnedResource, StatusFragment, UnitAdapter, resolve_adapters};
pub use common::{owner_reference, standard_labels};
