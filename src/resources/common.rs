//! Common resource generation utilities.
//!
//! Every object generated for a Unit is named after the Unit, lives in its
//! namespace, carries the Unit's labels plus a managed-by marker, and holds a
//! controller owner reference back to the Unit so the API server garbage
//! collects it when the Unit goes away.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, ObjectFieldSelector, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::Unit;

/// Label identifying objects written by this operator
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY: &str = "unit-operator";

/// Environment variable carrying the pod's own name
pub const ENV_POD_NAME: &str = "POD_NAME";
/// Environment variable carrying the owning Unit's name
pub const ENV_APP_NAME: &str = "APPNAME";

/// Namespace of a Unit, falling back to `default` for objects read without one.
pub fn unit_namespace(unit: &Unit) -> String {
    unit.namespace().unwrap_or_else(|| "default".to_string())
}

/// Labels applied to every generated object.
pub fn standard_labels(unit: &Unit) -> BTreeMap<String, String> {
    let mut labels = unit.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

/// Pod selector of the Unit, or `app=<name>` when the selector has no match labels.
pub fn selector_labels(unit: &Unit) -> BTreeMap<String, String> {
    match &unit.spec.selector.match_labels {
        Some(labels) if !labels.is_empty() => labels.clone(),
        _ => BTreeMap::from([("app".to_string(), unit.name_any())]),
    }
}

/// Create the controller owner reference for a Unit
pub fn owner_reference(unit: &Unit) -> OwnerReference {
    OwnerReference {
        api_version: Unit::api_version(&()).to_string(),
        kind: Unit::kind(&()).to_string(),
        name: unit.name_any(),
        uid: unit.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata shared by all generated objects.
pub fn child_metadata(unit: &Unit) -> ObjectMeta {
    ObjectMeta {
        name: Some(unit.name_any()),
        namespace: Some(unit_namespace(unit)),
        labels: Some(standard_labels(unit)),
        owner_references: Some(vec![owner_reference(unit)]),
        ..Default::default()
    }
}

/// Inject pod identity and Unit name into the first container.
///
/// Caller-supplied `POD_NAME`/`APPNAME` entries are dropped, every other entry
/// keeps its relative order, and the two synthesized entries are appended last.
pub fn inject_env(template: &mut PodTemplateSpec, unit_name: &str) {
    let Some(container) = template
        .spec
        .as_mut()
        .and_then(|spec| spec.containers.first_mut())
    else {
        return;
    };

    let mut env: Vec<EnvVar> = container
        .env
        .take()
        .unwrap_or_default()
        .into_iter()
        .filter(|e| e.name != ENV_POD_NAME && e.name != ENV_APP_NAME)
        .collect();

    env.push(EnvVar {
        name: ENV_POD_NAME.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: "metadata.name".to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    });
    env.push(EnvVar {
        name: ENV_APP_NAME.to_string(),
        value: Some(unit_name.to_string()),
        ..Default::default()
    });

    container.env = Some(env);
}

/// Take `observed` when `desired` was left for the server to fill in.
pub(crate) fn fill<T: Clone>(desired: &mut Option<T>, observed: &Option<T>) {
    if desired.is_none() {
        desired.clone_from(observed);
    }
}
