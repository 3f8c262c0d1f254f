// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for unit-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components in isolation.

mod crd_tests {
    use kube::CustomResourceExt;
    use serde_json::json;
    use unit_operator::crd::{Condition, Unit, UnitCategory, UnitSpec, UnitStatus};

    #[test]
    fn test_category_default_is_statefulset() {
        assert_eq!(UnitCategory::default(), UnitCategory::StatefulSet);
        assert_eq!(UnitCategory::Deployment.to_string(), "Deployment");
    }

    #[test]
    fn test_minimal_manifest_defaults() {
        let unit: Unit = serde_json::from_value(json!({
            "apiVersion": "custom.unit.crd.com/v1",
            "kind": "Unit",
            "metadata": { "name": "web", "namespace": "default" },
            "spec": {
                "selector": { "matchLabels": { "app": "web" } },
                "template": {
                    "spec": { "containers": [{ "name": "web", "image": "nginx:alpine" }] }
                }
            }
        }))
        .unwrap();

        assert_eq!(unit.spec.category, UnitCategory::StatefulSet);
        assert_eq!(unit.spec.replicas, None);
        assert!(unit.spec.relation_resource.service.is_none());
        assert!(unit.spec.relation_resource.ingress.is_none());
        assert!(unit.spec.relation_resource.pvc.is_none());
        assert!(unit.status.is_none());
    }

    #[test]
    fn test_relation_resource_field_names() {
        let spec: UnitSpec = serde_json::from_value(json!({
            "category": "Deployment",
            "replicas": 2,
            "selector": {},
            "template": {},
            "relationResource": {
                "service": { "ports": [{ "name": "http", "port": 80 }], "clusterIp": "" },
                "pvc": { "spec": { "accessModes": ["ReadWriteOnce"] } }
            }
        }))
        .unwrap();

        assert_eq!(spec.category, UnitCategory::Deployment);
        let service = spec.relation_resource.service.unwrap();
        assert_eq!(service.ports[0].port, 80);
        assert!(spec.relation_resource.pvc.is_some());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = UnitStatus {
            last_update_time: Some("2026-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["lastUpdateTime"], "2026-01-01T00:00:00Z");
        assert!(value.get("relationResourceStatus").is_some());
        assert!(value.get("baseStatefulSet").is_none());
    }

    #[test]
    fn test_same_observation_ignores_update_time() {
        let a = UnitStatus {
            last_update_time: Some("2026-01-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let b = UnitStatus {
            last_update_time: Some("2026-02-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        assert!(a.same_observation(&b));

        let c = UnitStatus {
            conditions: vec![Condition::ready(true, "AllReplicasReady", "1/1", None)],
            ..Default::default()
        };
        assert!(!a.same_observation(&c));
    }

    #[test]
    fn test_crd_definition() {
        let crd = Unit::crd();
        assert_eq!(crd.spec.group, "custom.unit.crd.com");
        assert_eq!(crd.spec.names.kind, "Unit");
        assert_eq!(crd.spec.names.plural, "units");
        assert_eq!(crd.spec.versions[0].name, "v1");
        assert!(crd.spec.versions[0].subresources.is_some());
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "AllReplicasReady", "3/3 replicas ready", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.observed_generation, Some(1));
        assert!(!condition.last_transition_time.is_empty());
    }
}

mod error_tests {
    use unit_operator::controller::error::{AdapterFailures, AdapterStep, Error};

    #[test]
    fn test_error_is_retryable() {
        let kube_err = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "timeout".to_string(),
            reason: "Timeout".to_string(),
            code: 504,
        }));
        assert!(kube_err.is_retryable());

        let conflict = Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }));
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());

        assert!(!Error::Validation("invalid spec".to_string()).is_retryable());
        assert!(Error::Transient("temporary failure".to_string()).is_retryable());
        assert!(Error::PreDelete("busy".to_string()).is_retryable());
    }

    #[test]
    fn test_adapter_failures_report_every_kind() {
        let mut failures = AdapterFailures::default();
        failures.push("Service", AdapterStep::Apply, Error::Transient("timeout".into()));
        failures.push(
            "Ingress",
            AdapterStep::UpdateStatus,
            Error::Conflict("Ingress default/web".into()),
        );

        let message = Error::Adapters(failures).to_string();
        assert!(message.starts_with("2 adapter operation(s) failed"));
        assert!(message.contains("Service apply"));
        assert!(message.contains("Ingress update status"));
    }

    #[test]
    fn test_adapter_failures_retryable_if_any_is() {
        let mut failures = AdapterFailures::default();
        failures.push("Service", AdapterStep::Apply, Error::Validation("bad".into()));
        assert!(!Error::Adapters(failures).is_retryable());

        let mut failures = AdapterFailures::default();
        failures.push("Service", AdapterStep::Apply, Error::Validation("bad".into()));
        failures.push("Ingress", AdapterStep::Apply, Error::Transient("later".into()));
        assert!(Error::Adapters(failures).is_retryable());
    }
}

mod status_tests {
    use unit_operator::controller::status::{ConditionBuilder, is_condition_true};
    use unit_operator::crd::Condition;

    #[test]
    fn test_condition_builder() {
        let mut builder = ConditionBuilder::new();
        builder.ready(true, "AllReplicasReady", "1/1 replicas ready", Some(1));
        builder.degraded(false, "Reconciled", "All resources applied", Some(1));
        let conditions = builder.build();

        assert_eq!(conditions.len(), 2);
        assert!(is_condition_true(&conditions, "Ready"));
        assert!(!is_condition_true(&conditions, "Degraded"));
    }

    #[test]
    fn test_condition_builder_updates_existing() {
        let mut builder = ConditionBuilder::new();
        builder.ready(false, "WaitingForReplicas", "0/1 replicas ready", Some(1));
        builder.ready(true, "AllReplicasReady", "1/1 replicas ready", Some(1));
        let conditions = builder.build();

        assert_eq!(conditions.len(), 1);
        assert!(is_condition_true(&conditions, "Ready"));
    }

    #[test]
    fn test_is_condition_true_missing() {
        let conditions: Vec<Condition> = vec![];
        assert!(!is_condition_true(&conditions, "Ready"));
    }
}

mod config_tests {
    use std::time::Duration;
    use unit_operator::OperatorConfig;

    #[test]
    fn test_probe_timeout_from_lookup() {
        let config = OperatorConfig::from_lookup(|key: &str| {
            (key == "PROBE_TIMEOUT_MS").then(|| "75".to_string())
        })
        .unwrap();
        assert_eq!(config.probe_timeout, Duration::from_millis(75));
        assert_eq!(config.health_port, 8080);
    }
}
