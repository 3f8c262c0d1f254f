//! In-process object store.
//!
//! Behaves like a small API server: it assigns resource versions and uids,
//! rejects stale writes, keeps status as a separate subresource, fills in
//! the server-side defaults that matter to the adapters, removes objects once
//! their deletion timestamp is set and no finalizer remains, and cascades
//! that removal to owned objects. Every write is recorded so callers can
//! assert on exactly what reached the store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use super::{ListSelector, Notice, ResourceStore, StoreObject};
use crate::controller::error::{Error, Result};
use crate::crd::Unit;

/// Timestamp written by [`MemoryStore::request_deletion`].
const DELETION_TIMESTAMP: &str = "2026-01-01T00:00:00Z";

/// Store operation, used for write records and failure injection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Replace,
    ReplaceStatus,
    List,
}

/// A write that reached the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreWrite {
    pub verb: Verb,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    kind: String,
    namespace: String,
    name: String,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Value>,
    next_version: u64,
    next_ip: u32,
    writes: Vec<StoreWrite>,
    notices: Vec<(String, Notice)>,
    failures: Vec<(String, Verb)>,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn check_failure(&self, kind: &str, verb: Verb) -> Result<()> {
        if self.failures.iter().any(|(k, v)| k == kind && *v == verb) {
            return Err(Error::Transient(format!(
                "injected {:?} failure for {}",
                verb, kind
            )));
        }
        Ok(())
    }

    fn record(&mut self, verb: Verb, key: &ObjectKey) {
        self.writes.push(StoreWrite {
            verb,
            kind: key.kind.clone(),
            namespace: key.namespace.clone(),
            name: key.name.clone(),
        });
    }

    /// Physically remove an object and everything that lists it as owner.
    fn remove_cascading(&mut self, key: &ObjectKey) {
        let Some(removed) = self.objects.remove(key) else {
            return;
        };
        debug!(kind = %key.kind, name = %key.name, "Object removed from store");

        let Some(uid) = removed
            .pointer("/metadata/uid")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };
        let dependents: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|(_, obj)| owned_by(obj, &uid))
            .map(|(k, _)| k.clone())
            .collect();
        for dependent in dependents {
            self.remove_cascading(&dependent);
        }
    }
}

/// In-process [`ResourceStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    cluster_ip: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `ip` as the cluster IP of every created Service.
    pub fn with_cluster_ip(mut self, ip: impl Into<String>) -> Self {
        self.cluster_ip = Some(ip.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key<K: StoreObject>(namespace: &str, name: &str) -> ObjectKey {
        ObjectKey {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Insert or overwrite an object as the server itself would, without
    /// recording a write. Returns the stored resource version.
    pub fn seed<K: StoreObject>(&self, obj: &K) -> Result<String> {
        let mut value = serde_json::to_value(obj)?;
        let namespace = string_at(&value, "/metadata/namespace").unwrap_or("default").to_string();
        let name = string_at(&value, "/metadata/name").unwrap_or_default().to_string();
        let key = Self::key::<K>(&namespace, &name);

        let mut inner = self.lock();
        let version = inner.bump();
        set_meta(&mut value, "namespace", json!(namespace));
        set_meta(&mut value, "resourceVersion", json!(version));
        if string_at(&value, "/metadata/uid").is_none() {
            set_meta(&mut value, "uid", json!(format!("uid-{}", version)));
        }
        inner.objects.insert(key, value);
        Ok(version)
    }

    /// Read an object without failure injection.
    pub fn snapshot<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let inner = self.lock();
        inner
            .objects
            .get(&Self::key::<K>(namespace, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Mutate a stored object in place as a server-side controller would
    /// (e.g. to publish workload status). Bumps the resource version and
    /// does not record a write.
    pub fn modify<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut K),
    ) -> Result<()> {
        let key = Self::key::<K>(namespace, name);
        let mut inner = self.lock();
        let current = inner.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        let mut obj: K = serde_json::from_value(current)?;
        f(&mut obj);
        let mut value = serde_json::to_value(&obj)?;
        let version = inner.bump();
        set_meta(&mut value, "resourceVersion", json!(version));
        inner.objects.insert(key, value);
        Ok(())
    }

    /// Simulate an external delete request: set the deletion timestamp while
    /// finalizers remain, remove the object (and its dependents) otherwise.
    pub fn request_deletion<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let key = Self::key::<K>(namespace, name);
        let mut inner = self.lock();
        let Some(mut value) = inner.objects.get(&key).cloned() else {
            return Err(not_found(&key));
        };
        if has_finalizers(&value) {
            set_meta(&mut value, "deletionTimestamp", json!(DELETION_TIMESTAMP));
            let version = inner.bump();
            set_meta(&mut value, "resourceVersion", json!(version));
            inner.objects.insert(key, value);
        } else {
            inner.remove_cascading(&key);
        }
        Ok(())
    }

    /// Make every `verb` on `K` fail with a transient error until cleared.
    pub fn fail_on<K: StoreObject>(&self, verb: Verb) {
        self.lock().failures.push((K::kind(&()).to_string(), verb));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// All writes recorded so far, in order.
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.lock().writes.clone()
    }

    /// Writes recorded for one kind.
    pub fn writes_for<K: StoreObject>(&self) -> Vec<StoreWrite> {
        let kind = K::kind(&());
        self.lock()
            .writes
            .iter()
            .filter(|w| w.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Notices published so far, keyed by unit name.
    pub fn notices(&self) -> Vec<(String, Notice)> {
        self.lock().notices.clone()
    }

    /// Number of stored objects of kind `K`.
    pub fn count<K: StoreObject>(&self) -> usize {
        let kind = K::kind(&());
        self.lock().objects.keys().filter(|k| k.kind == kind).count()
    }

    fn next_cluster_ip(&self, inner: &mut Inner) -> String {
        if let Some(ip) = &self.cluster_ip {
            return ip.clone();
        }
        inner.next_ip += 1;
        format!("10.96.{}.{}", inner.next_ip / 256, inner.next_ip % 256)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K> {
        let key = Self::key::<K>(namespace, name);
        let inner = self.lock();
        inner.check_failure(&key.kind, Verb::Get)?;
        let value = inner.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let mut value = serde_json::to_value(obj)?;
        let name = string_at(&value, "/metadata/name").unwrap_or_default().to_string();
        let key = Self::key::<K>(namespace, &name);

        let mut inner = self.lock();
        inner.check_failure(&key.kind, Verb::Create)?;
        if inner.objects.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "{} {}/{}",
                key.kind, key.namespace, key.name
            )));
        }

        let version = inner.bump();
        set_meta(&mut value, "namespace", json!(namespace));
        set_meta(&mut value, "resourceVersion", json!(version));
        set_meta(&mut value, "uid", json!(format!("uid-{}", version)));
        if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }
        if key.kind == "Service" && string_at(&value, "/spec/clusterIP").is_none_or(str::is_empty) {
            let ip = self.next_cluster_ip(&mut inner);
            set_path(&mut value, &["spec", "clusterIP"], json!(ip));
        }
        apply_server_defaults(&key.kind, &mut value);

        inner.record(Verb::Create, &key);
        inner.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let mut value = serde_json::to_value(obj)?;
        let name = string_at(&value, "/metadata/name").unwrap_or_default().to_string();
        let key = Self::key::<K>(namespace, &name);

        let mut inner = self.lock();
        inner.check_failure(&key.kind, Verb::Replace)?;
        let existing = inner.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        check_version(&key, &existing, &value)?;

        // Status, identity and deletion state are owned by the server
        for field in ["uid", "deletionTimestamp", "namespace"] {
            match existing.pointer(&format!("/metadata/{}", field)) {
                Some(v) => set_meta(&mut value, field, v.clone()),
                None => remove_meta(&mut value, field),
            }
        }
        if let Some(map) = value.as_object_mut() {
            match existing.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }
        apply_server_defaults(&key.kind, &mut value);
        let version = inner.bump();
        set_meta(&mut value, "resourceVersion", json!(version));

        inner.record(Verb::Replace, &key);
        let released = value.pointer("/metadata/deletionTimestamp").is_some() && !has_finalizers(&value);
        inner.objects.insert(key.clone(), value.clone());
        if released {
            inner.remove_cascading(&key);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Whole-status PUT: slots missing from `obj` are removed.
    async fn replace_status<K: StoreObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let incoming = serde_json::to_value(obj)?;
        let name = string_at(&incoming, "/metadata/name").unwrap_or_default().to_string();
        let key = Self::key::<K>(namespace, &name);

        let mut inner = self.lock();
        inner.check_failure(&key.kind, Verb::ReplaceStatus)?;
        let mut existing = inner.objects.get(&key).cloned().ok_or_else(|| not_found(&key))?;
        check_version(&key, &existing, &incoming)?;

        if let Some(map) = existing.as_object_mut() {
            match incoming.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }
        let version = inner.bump();
        set_meta(&mut existing, "resourceVersion", json!(version));

        inner.record(Verb::ReplaceStatus, &key);
        inner.objects.insert(key, existing.clone());
        Ok(serde_json::from_value(existing)?)
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        selector: &ListSelector,
    ) -> Result<Vec<K>> {
        let kind = K::kind(&()).to_string();
        let inner = self.lock();
        inner.check_failure(&kind, Verb::List)?;

        inner
            .objects
            .iter()
            .filter(|(k, _)| k.kind == kind && k.namespace == namespace)
            .filter(|(_, v)| labels_match(v, selector) && fields_match(v, selector))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn publish_notice(&self, unit: &Unit, notice: Notice) {
        let name = unit.metadata.name.clone().unwrap_or_default();
        self.lock().notices.push((name, notice));
    }
}

fn not_found(key: &ObjectKey) -> Error {
    Error::NotFound {
        kind: key.kind.clone(),
        namespace: key.namespace.clone(),
        name: key.name.clone(),
    }
}

fn check_version(key: &ObjectKey, existing: &Value, incoming: &Value) -> Result<()> {
    match string_at(incoming, "/metadata/resourceVersion") {
        Some(version) if Some(version) != string_at(existing, "/metadata/resourceVersion") => {
            Err(Error::Conflict(format!(
                "{} {}/{}",
                key.kind, key.namespace, key.name
            )))
        }
        _ => Ok(()),
    }
}

fn string_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn has_finalizers(value: &Value) -> bool {
    value
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

fn owned_by(value: &Value, uid: &str) -> bool {
    value
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("uid").and_then(Value::as_str) == Some(uid))
        })
}

fn set_meta(value: &mut Value, field: &str, v: Value) {
    set_path(value, &["metadata", field], v);
}

fn remove_meta(value: &mut Value, field: &str) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.remove(field);
    }
}

/// Set `v` at `path`, creating intermediate objects.
fn set_path(value: &mut Value, path: &[&str], v: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = value;
    for segment in parents {
        if !current.get(*segment).is_some_and(Value::is_object) {
            if let Some(map) = current.as_object_mut() {
                map.insert((*segment).to_string(), json!({}));
            }
        }
        match current.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
    if let Some(map) = current.as_object_mut() {
        map.insert((*last).to_string(), v);
    }
}

/// Set `v` at `path` only when nothing is there yet.
fn default_path(value: &mut Value, path: &[&str], v: Value) {
    let pointer = format!("/{}", path.join("/"));
    if value.pointer(&pointer).is_none_or(Value::is_null) {
        set_path(value, path, v);
    }
}

/// The subset of API server defaulting that the adapters must tolerate.
fn apply_server_defaults(kind: &str, value: &mut Value) {
    match kind {
        "Service" => {
            default_path(value, &["spec", "type"], json!("ClusterIP"));
            default_path(value, &["spec", "sessionAffinity"], json!("None"));
            if let Some(ip) = string_at(value, "/spec/clusterIP").map(str::to_string) {
                default_path(value, &["spec", "clusterIPs"], json!([ip]));
            }
            default_path(value, &["spec", "ipFamilies"], json!(["IPv4"]));
            default_path(value, &["spec", "ipFamilyPolicy"], json!("SingleStack"));
            default_path(value, &["spec", "internalTrafficPolicy"], json!("Cluster"));
            if let Some(ports) = value.pointer_mut("/spec/ports").and_then(Value::as_array_mut) {
                for port in ports {
                    default_path(port, &["protocol"], json!("TCP"));
                    if let Some(number) = port.get("port").cloned() {
                        default_path(port, &["targetPort"], number);
                    }
                }
            }
        }
        "StatefulSet" | "Deployment" => {
            default_path(value, &["spec", "revisionHistoryLimit"], json!(10));
            if kind == "StatefulSet" {
                default_path(value, &["spec", "podManagementPolicy"], json!("OrderedReady"));
                default_path(
                    value,
                    &["spec", "updateStrategy"],
                    json!({"type": "RollingUpdate", "rollingUpdate": {"partition": 0}}),
                );
            } else {
                default_path(value, &["spec", "progressDeadlineSeconds"], json!(600));
                default_path(
                    value,
                    &["spec", "strategy"],
                    json!({"type": "RollingUpdate", "rollingUpdate": {"maxSurge": "25%", "maxUnavailable": "25%"}}),
                );
            }
            if let Some(pod) = value.pointer_mut("/spec/template/spec") {
                default_path(pod, &["restartPolicy"], json!("Always"));
                default_path(pod, &["dnsPolicy"], json!("ClusterFirst"));
                default_path(pod, &["schedulerName"], json!("default-scheduler"));
                default_path(pod, &["terminationGracePeriodSeconds"], json!(30));
                default_path(pod, &["securityContext"], json!({}));
                if let Some(containers) = pod.get_mut("containers").and_then(Value::as_array_mut) {
                    for container in containers {
                        default_path(container, &["terminationMessagePath"], json!("/dev/termination-log"));
                        default_path(container, &["terminationMessagePolicy"], json!("File"));
                        default_path(container, &["imagePullPolicy"], json!("IfNotPresent"));
                        default_path(container, &["resources"], json!({}));
                    }
                }
            }
        }
        "Ingress" => {
            default_path(value, &["spec", "ingressClassName"], json!("default"));
        }
        "PersistentVolumeClaim" => {
            default_path(value, &["spec", "volumeMode"], json!("Filesystem"));
            default_path(value, &["spec", "storageClassName"], json!("standard"));
        }
        _ => {}
    }
}

fn labels_match(value: &Value, selector: &ListSelector) -> bool {
    selector.match_labels.iter().all(|(k, v)| {
        value
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(k))
            .and_then(Value::as_str)
            == Some(v.as_str())
    })
}

/// Evaluate `path=value` / `path==value` / `path!=value` requirements.
fn fields_match(value: &Value, selector: &ListSelector) -> bool {
    let Some(fields) = &selector.fields else {
        return true;
    };
    fields
        .split(',')
        .map(str::trim)
        .filter(|req| !req.is_empty())
        .all(|req| {
            let (path, expected, negate) = if let Some((p, v)) = req.split_once("!=") {
                (p, v, true)
            } else if let Some((p, v)) = req.split_once("==") {
                (p, v, false)
            } else if let Some((p, v)) = req.split_once('=') {
                (p, v, false)
            } else {
                return false;
            };
            let pointer = format!("/{}", path.trim().replace('.', "/"));
            let actual = value.pointer(&pointer).and_then(Value::as_str).unwrap_or("");
            (actual == expected.trim()) != negate
        })
}
