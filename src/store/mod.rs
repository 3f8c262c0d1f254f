//! Object store abstraction.
//!
//! The reconcile core talks to the cluster only through [`ResourceStore`]:
//! typed get/create/replace keyed by (kind, namespace, name), status writes
//! guarded by the stored resource version, selector-based listing, and
//! best-effort notices. [`KubeStore`] backs it with the Kubernetes API.
//! With the `test-util` feature, `MemoryStore` keeps everything in process
//! for tests.

mod kube_store;
#[cfg(any(test, feature = "test-util"))]
mod memory;

pub use kube_store::KubeStore;
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryStore, StoreWrite, Verb};

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::Result;
use crate::crd::Unit;

/// Bounds shared by every namespaced object the store can hold.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Contract of the external declarative object store.
///
/// Writes carry the object's `metadata.resourceVersion`; a stale version is
/// reported as [`Error::Conflict`](crate::controller::error::Error::Conflict)
/// and never overwrites.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch an object. A missing object is an error for which `is_not_found()` holds.
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K>;

    /// Create an object in `namespace`.
    async fn create<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replace an object's metadata and spec. Status is left untouched.
    async fn replace<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Replace an object's status subresource.
    async fn replace_status<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// List objects matching a label and field selector, ordered by name.
    async fn list<K: StoreObject>(&self, namespace: &str, selector: &ListSelector)
    -> Result<Vec<K>>;

    /// Attach a human-readable notice to a unit. Never fails the caller.
    async fn publish_notice(&self, unit: &Unit, notice: Notice);

    /// Fetch an object, folding "not found" into `None`.
    async fn get_opt<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        match self.get::<K>(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Label and field selector for [`ResourceStore::list`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListSelector {
    /// Equality-based label requirements
    pub match_labels: BTreeMap<String, String>,
    /// Field selector in API syntax, e.g. `status.phase!=Failed`
    pub fields: Option<String>,
}

impl ListSelector {
    pub fn labels(match_labels: BTreeMap<String, String>) -> Self {
        Self {
            match_labels,
            fields: None,
        }
    }

    pub fn fields(mut self, fields: impl Into<String>) -> Self {
        self.fields = Some(fields.into());
        self
    }

    /// Render the label requirements in API syntax (`k1=v1,k2=v2`).
    pub fn label_selector(&self) -> Option<String> {
        if self.match_labels.is_empty() {
            return None;
        }
        Some(
            self.match_labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}

/// Severity of a notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeType {
    Normal,
    Warning,
}

/// A human-readable notice attached to a unit (a Kubernetes Event).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub type_: NoticeType,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

impl Notice {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            type_: NoticeType::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        Self {
            type_: NoticeType::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: Some(note.into()),
        }
    }
}
