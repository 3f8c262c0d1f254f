//! Kubernetes API backed store.

use async_trait::async_trait;
use kube::api::{ListParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::warn;

use super::{ListSelector, Notice, NoticeType, ResourceStore, StoreObject};
use crate::controller::error::{Error, Result};
use crate::crd::Unit;

/// Field manager name for writes issued by the operator
pub const FIELD_MANAGER: &str = "unit-operator";

/// [`ResourceStore`] backed by a kube [`Client`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    reporter: Reporter,
}

impl KubeStore {
    /// Create a store; `instance` identifies this replica in published events.
    pub fn new(client: Client, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: FIELD_MANAGER.into(),
                instance,
            },
        }
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }
}

/// Body of a status PUT: the whole object, so slots left out of the status
/// are removed and `resourceVersion` rejects stale writes.
fn status_body<K: StoreObject>(obj: &K) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(obj)?)
}

/// Map API status codes onto the crate's retry classification.
fn classify<K: StoreObject>(err: kube::Error, namespace: &str, name: &str) -> Error {
    let what = format!("{} {}/{}", K::kind(&()), namespace, name);
    match err {
        kube::Error::Api(ref e) if e.code == 404 => Error::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ref e) if e.code == 409 && e.reason == "AlreadyExists" => {
            Error::AlreadyExists(what)
        }
        kube::Error::Api(ref e) if e.code == 409 => Error::Conflict(what),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| classify::<K>(e, namespace, name))
    }

    async fn create<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api::<K>(namespace)
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| classify::<K>(e, namespace, &name))
    }

    async fn replace<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api::<K>(namespace)
            .replace(&name, &Self::post_params(), obj)
            .await
            .map_err(|e| classify::<K>(e, namespace, &name))
    }

    async fn replace_status<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        self.api::<K>(namespace)
            .replace_status(&name, &Self::post_params(), status_body(obj)?)
            .await
            .map_err(|e| classify::<K>(e, namespace, &name))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        selector: &ListSelector,
    ) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(labels) = selector.label_selector() {
            params = params.labels(&labels);
        }
        if let Some(fields) = &selector.fields {
            params = params.fields(fields);
        }

        let mut items = self
            .api::<K>(namespace)
            .list(&params)
            .await
            .map_err(|e| classify::<K>(e, namespace, ""))?
            .items;
        items.sort_by_key(|item| item.name_any());
        Ok(items)
    }

    async fn publish_notice(&self, unit: &Unit, notice: Notice) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let object_ref = unit.object_ref(&());
        let type_ = match notice.type_ {
            NoticeType::Normal => EventType::Normal,
            NoticeType::Warning => EventType::Warning,
        };
        if let Err(e) = recorder
            .publish(
                &Event {
                    type_,
                    reason: notice.reason.clone(),
                    note: notice.note,
                    action: notice.action,
                    secondary: None,
                },
                &object_ref,
            )
            .await
        {
            warn!(reason = %notice.reason, error = %e, "Failed to publish event");
        }
    }
}
