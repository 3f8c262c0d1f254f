//! Unit Custom Resource Definition.
//!
//! A `Unit` declares one primary workload (StatefulSet or Deployment) plus an
//! optional bundle of related resources (Service, Ingress, PersistentVolumeClaim)
//! that the operator creates and keeps in sync on its behalf.

use k8s_openapi::api::apps::v1::{DeploymentStatus, StatefulSetStatus};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, PodTemplateSpec, ServicePort,
};
use k8s_openapi::api::networking::v1::{IngressRule, IngressStatus, IngressTLS};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Unit is the desired-state record reconciled by this operator.
///
/// Example:
/// ```yaml
/// apiVersion: custom.unit.crd.com/v1
/// kind: Unit
/// metadata:
///   name: web
/// spec:
///   category: StatefulSet
///   replicas: 3
///   selector:
///     matchLabels:
///       app: web
///   template:
///     metadata:
///       labels:
///         app: web
///     spec:
///       containers:
///         - name: web
///           image: nginx:alpine
///   relationResource:
///     service:
///       ports:
///         - name: http
///           port: 80
///           protocol: TCP
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "custom.unit.crd.com",
    version = "v1",
    kind = "Unit",
    plural = "units",
    shortname = "unit",
    status = "UnitStatus",
    namespaced,
    derive = "PartialEq",
    derive = "Default",
    printcolumn = r#"{"name":"Category", "type":"string", "jsonPath":".spec.category"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Updated", "type":"string", "priority":1, "jsonPath":".status.lastUpdateTime"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    /// Kind of primary workload backing this unit (default: StatefulSet).
    #[serde(default)]
    pub category: UnitCategory,

    /// Desired number of pods for the primary workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Label selector for the pods of the primary workload.
    pub selector: LabelSelector,

    /// Pod template for the primary workload. Must declare at least one container.
    pub template: PodTemplateSpec,

    /// Secondary resources managed alongside the workload.
    #[serde(default)]
    pub relation_resource: UnitRelationResource,
}

/// Selects the primary workload adapter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum UnitCategory {
    /// Backed by an apps/v1 Deployment.
    Deployment,
    /// Backed by an apps/v1 StatefulSet.
    #[default]
    StatefulSet,
}

impl std::fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitCategory::Deployment => write!(f, "Deployment"),
            UnitCategory::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// Optional secondary resources. Each populated field yields exactly one adapter.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitRelationResource {
    /// Network exposure for the workload pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<OwnService>,

    /// HTTP routing into the workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<OwnIngress>,

    /// Standalone volume claim named after the unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<OwnPvc>,
}

/// Network exposure spec.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnService {
    /// Ports exposed by the service. At least one is required.
    #[serde(default)]
    pub ports: Vec<ServicePort>,

    /// Fixed cluster IP. Left empty, the API server assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
}

/// Ingress spec.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnIngress {
    /// IngressClass to bind to. Left empty, the cluster default class applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,

    /// Host and path routing rules.
    #[serde(default)]
    pub rules: Vec<IngressRule>,

    /// TLS termination settings.
    #[serde(default)]
    pub tls: Vec<IngressTLS>,
}

/// Volume claim spec.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OwnPvc {
    /// Claim spec applied verbatim to the generated PersistentVolumeClaim.
    pub spec: PersistentVolumeClaimSpec,
}

/// Observed state of a Unit. Written by the operator, never read back as desired state.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatus {
    /// Mirror of the StatefulSet status when `category` is StatefulSet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_stateful_set: Option<StatefulSetStatus>,

    /// Mirror of the Deployment status when `category` is Deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_deployment: Option<DeploymentStatus>,

    /// Live pods matched by the unit selector, sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pods: Vec<UnitPodStatus>,

    /// Status of the secondary resources.
    #[serde(default)]
    pub relation_resource_status: UnitRelationResourceStatus,

    /// Conditions describing the outcome of the last reconcile pass.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// RFC 3339 time of the last status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

impl UnitStatus {
    /// Compare two statuses ignoring `lastUpdateTime`.
    pub fn same_observation(&self, other: &UnitStatus) -> bool {
        self.base_stateful_set == other.base_stateful_set
            && self.base_deployment == other.base_deployment
            && self.pods == other.pods
            && self.relation_resource_status == other.relation_resource_status
            && self.conditions == other.conditions
    }
}

/// Pod summary for the primary workload.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitPodStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default)]
    pub ready: bool,
}

/// Status of the secondary resources.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitRelationResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<UnitRelationServiceStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressStatus>,

    /// Addresses of the first subset of the companion Endpoints object.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoint: Vec<UnitRelationEndpointStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PersistentVolumeClaimStatus>,
}

/// Observed network exposure.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitRelationServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,
    /// One entry per declared port, in declaration order.
    #[serde(default)]
    pub ports: Vec<ServicePortStatus>,
}

/// A service port together with the result of its reachability probe.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortStatus {
    pub service_port: ServicePort,
    #[serde(default)]
    pub health: bool,
}

/// One backing pod address of the network exposure.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitRelationEndpointStatus {
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub pod_ip: String,
    #[serde(default)]
    pub node_name: String,
}

/// Condition describes the state of a unit at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Last time the condition transitioned from one status to another.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition stamped with the current time.
    pub fn new(
        condition_type: &str,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(CONDITION_READY, ready, reason, message, generation)
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(CONDITION_DEGRADED, degraded, reason, message, generation)
    }

    /// Same type, status, reason, message and generation; transition time is ignored.
    pub fn same_state(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Condition type set when the unit is fully converged.
pub const CONDITION_READY: &str = "Ready";

/// Condition type set when at least one adapter failed during the last pass.
pub const CONDITION_DEGRADED: &str = "Degraded";
