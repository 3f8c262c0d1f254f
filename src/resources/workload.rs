//! Primary workload generation.
//!
//! A Unit is backed by exactly one StatefulSet or Deployment, chosen by
//! `spec.category`. Both variants:
//! - take replicas, selector and pod template straight from the Unit spec
//! - inject `POD_NAME` and `APPNAME` into the first container
//! - report the workload status plus the live pods matched by the selector
//!
//! The StatefulSet uses the Unit name as its governing service. The
//! Deployment forces the template labels to the selector's match labels so
//! the two can never disagree.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;

use crate::controller::error::{Error, Result};
use crate::crd::{Unit, UnitPodStatus};
use crate::probe::PortProbe;
use crate::resources::adapter::{OwnedResource, StatusFragment};
use crate::resources::common::{child_metadata, fill, inject_env, selector_labels, unit_namespace};
use crate::store::{ListSelector, ResourceStore};

/// Replica count used when the Unit leaves it unset (the API server default)
const DEFAULT_REPLICAS: i32 = 1;

/// Field selector excluding pods that have terminated
const LIVE_POD_FIELDS: &str = "status.phase!=Succeeded,status.phase!=Failed";

/// Adapter for `category: StatefulSet`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatefulSetAdapter;

/// Adapter for `category: Deployment`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeploymentAdapter;

/// Desired replica count of a Unit.
pub fn desired_replicas(unit: &Unit) -> i32 {
    unit.spec.replicas.unwrap_or(DEFAULT_REPLICAS)
}

/// Selector with match labels normalized through [`selector_labels`].
fn generate_selector(unit: &Unit) -> LabelSelector {
    LabelSelector {
        match_labels: Some(selector_labels(unit)),
        match_expressions: unit.spec.selector.match_expressions.clone(),
    }
}

/// Pod template with injected environment. Fails when no container is declared.
fn generate_pod_template(unit: &Unit) -> Result<PodTemplateSpec> {
    let mut template = unit.spec.template.clone();
    let has_containers = template
        .spec
        .as_ref()
        .is_some_and(|spec| !spec.containers.is_empty());
    if !has_containers {
        return Err(Error::Validation(format!(
            "Unit {} pod template declares no containers",
            unit.name_any()
        )));
    }
    inject_env(&mut template, &unit.name_any());
    Ok(template)
}

/// Carry API server defaults of the pod template forward.
fn carry_forward_pod_template(observed: &PodTemplateSpec, desired: &mut PodTemplateSpec) {
    let (Some(observed), Some(desired)) = (observed.spec.as_ref(), desired.spec.as_mut()) else {
        return;
    };
    fill(&mut desired.restart_policy, &observed.restart_policy);
    fill(&mut desired.dns_policy, &observed.dns_policy);
    fill(&mut desired.scheduler_name, &observed.scheduler_name);
    fill(
        &mut desired.termination_grace_period_seconds,
        &observed.termination_grace_period_seconds,
    );
    fill(&mut desired.security_context, &observed.security_context);

    for (want, have) in desired.containers.iter_mut().zip(&observed.containers) {
        if want.name != have.name {
            continue;
        }
        fill(&mut want.termination_message_path, &have.termination_message_path);
        fill(&mut want.termination_message_policy, &have.termination_message_policy);
        fill(&mut want.image_pull_policy, &have.image_pull_policy);
        // The server stores omitted requirements as `{}`
        if want.resources.is_none() && have.resources.as_ref().is_some_and(is_empty_requirements) {
            want.resources.clone_from(&have.resources);
        }
        if let (Some(want_ports), Some(have_ports)) = (want.ports.as_mut(), have.ports.as_ref()) {
            for (wp, hp) in want_ports.iter_mut().zip(have_ports) {
                if wp.container_port == hp.container_port {
                    fill(&mut wp.protocol, &hp.protocol);
                }
            }
        }
    }
}

fn is_empty_requirements(resources: &ResourceRequirements) -> bool {
    resources.claims.as_ref().is_none_or(Vec::is_empty)
        && resources.limits.as_ref().is_none_or(BTreeMap::is_empty)
        && resources.requests.as_ref().is_none_or(BTreeMap::is_empty)
}

fn pod_status(pod: &Pod) -> UnitPodStatus {
    let status = pod.status.as_ref();
    UnitPodStatus {
        name: pod.name_any(),
        phase: status.and_then(|s| s.phase.clone()),
        pod_ip: status.and_then(|s| s.pod_ip.clone()),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        ready: status
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|conditions| {
                conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            }),
    }
}

/// Pods matched by the Unit selector that have not terminated, sorted by name.
async fn live_pods<S: ResourceStore>(unit: &Unit, store: &S) -> Result<Vec<UnitPodStatus>> {
    let selector = ListSelector::labels(selector_labels(unit)).fields(LIVE_POD_FIELDS);
    let pods: Vec<Pod> = store.list(&unit_namespace(unit), &selector).await?;
    let mut statuses: Vec<UnitPodStatus> = pods.iter().map(pod_status).collect();
    statuses.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(statuses)
}

#[async_trait]
impl OwnedResource for StatefulSetAdapter {
    type Object = StatefulSet;

    fn make(&self, unit: &Unit) -> Result<StatefulSet> {
        Ok(StatefulSet {
            metadata: child_metadata(unit),
            spec: Some(StatefulSetSpec {
                replicas: Some(desired_replicas(unit)),
                service_name: Some(unit.name_any()),
                selector: generate_selector(unit),
                template: generate_pod_template(unit)?,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn carry_forward(&self, observed: &StatefulSet, desired: &mut StatefulSet) {
        let (Some(observed), Some(desired)) = (observed.spec.as_ref(), desired.spec.as_mut())
        else {
            return;
        };
        fill(&mut desired.revision_history_limit, &observed.revision_history_limit);
        fill(&mut desired.pod_management_policy, &observed.pod_management_policy);
        fill(&mut desired.update_strategy, &observed.update_strategy);
        fill(
            &mut desired.persistent_volume_claim_retention_policy,
            &observed.persistent_volume_claim_retention_policy,
        );
        carry_forward_pod_template(&observed.template, &mut desired.template);
    }

    fn same_spec(&self, desired: &StatefulSet, observed: &StatefulSet) -> bool {
        desired.spec == observed.spec
    }

    async fn update_status<S, P>(&self, unit: &Unit, store: &S, _probe: &P) -> Result<StatusFragment>
    where
        S: ResourceStore,
        P: PortProbe,
    {
        let sts: StatefulSet = store.get(&unit_namespace(unit), &unit.name_any()).await?;
        Ok(StatusFragment::StatefulSet {
            status: sts.status,
            pods: live_pods(unit, store).await?,
        })
    }
}

#[async_trait]
impl OwnedResource for DeploymentAdapter {
    type Object = Deployment;

    fn make(&self, unit: &Unit) -> Result<Deployment> {
        let selector = generate_selector(unit);
        let mut template = generate_pod_template(unit)?;
        template.metadata.get_or_insert_with(Default::default).labels =
            selector.match_labels.clone();

        Ok(Deployment {
            metadata: child_metadata(unit),
            spec: Some(DeploymentSpec {
                replicas: Some(desired_replicas(unit)),
                selector,
                template,
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn carry_forward(&self, observed: &Deployment, desired: &mut Deployment) {
        let (Some(observed), Some(desired)) = (observed.spec.as_ref(), desired.spec.as_mut())
        else {
            return;
        };
        fill(&mut desired.revision_history_limit, &observed.revision_history_limit);
        fill(&mut desired.progress_deadline_seconds, &observed.progress_deadline_seconds);
        fill(&mut desired.strategy, &observed.strategy);
        carry_forward_pod_template(&observed.template, &mut desired.template);
    }

    fn same_spec(&self, desired: &Deployment, observed: &Deployment) -> bool {
        desired.spec == observed.spec
    }

    async fn update_status<S, P>(&self, unit: &Unit, store: &S, _probe: &P) -> Result<StatusFragment>
    where
        S: ResourceStore,
        P: PortProbe,
    {
        let deployment: Deployment = store.get(&unit_namespace(unit), &unit.name_any()).await?;
        Ok(StatusFragment::Deployment {
            status: deployment.status,
            pods: live_pods(unit, store).await?,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::crd::{UnitCategory, UnitSpec};
    use crate::resources::adapter::ApplyOutcome;
    use crate::resources::common::{ENV_APP_NAME, ENV_POD_NAME};
    use crate::store::{MemoryStore, Verb};
    use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn test_unit(name: &str, category: UnitCategory, replicas: i32) -> Unit {
        let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
        let mut unit = Unit::new(
            name,
            UnitSpec {
                category,
                replicas: Some(replicas),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "main".to_string(),
                            image: Some("nginx:alpine".to_string()),
                            env: Some(vec![EnvVar {
                                name: "LOG_LEVEL".to_string(),
                                value: Some("debug".to_string()),
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            },
        );
        unit.metadata.namespace = Some("default".to_string());
        unit.metadata.uid = Some("unit-uid".to_string());
        unit
    }

    struct NoProbe;

    #[async_trait]
    impl PortProbe for NoProbe {
        async fn probe(&self, _: &str, _: &str, _: i32) -> bool {
            false
        }
    }

    #[test]
    fn test_make_statefulset() {
        let unit = test_unit("web", UnitCategory::StatefulSet, 3);
        let sts = StatefulSetAdapter.make(&unit).unwrap();

        assert_eq!(sts.metadata.name.as_deref(), Some("web"));
        assert_eq!(sts.metadata.owner_references.unwrap()[0].uid, "unit-uid");
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(spec.service_name.as_deref(), Some("web"));
        let env = spec.template.spec.unwrap().containers[0].env.clone().unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["LOG_LEVEL", ENV_POD_NAME, ENV_APP_NAME]);
    }

    #[test]
    fn test_make_deployment_forces_template_labels() {
        let mut unit = test_unit("api", UnitCategory::Deployment, 2);
        unit.spec.template.metadata = Some(ObjectMeta {
            labels: Some(BTreeMap::from([("other".to_string(), "x".to_string())])),
            ..Default::default()
        });
        let deployment = DeploymentAdapter.make(&unit).unwrap();

        let spec = deployment.spec.unwrap();
        assert_eq!(
            spec.template.metadata.unwrap().labels,
            spec.selector.match_labels
        );
    }

    #[test]
    fn test_make_rejects_empty_template() {
        let mut unit = test_unit("web", UnitCategory::StatefulSet, 1);
        unit.spec.template = PodTemplateSpec::default();
        let err = StatefulSetAdapter.make(&unit).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_apply_is_idempotent_after_server_defaults() {
        let store = MemoryStore::new();
        let unit = test_unit("web", UnitCategory::StatefulSet, 3);

        assert_eq!(
            StatefulSetAdapter.apply(&unit, &store).await.unwrap(),
            ApplyOutcome::Created
        );
        assert_eq!(
            StatefulSetAdapter.apply(&unit, &store).await.unwrap(),
            ApplyOutcome::Unchanged
        );
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_tolerates_empty_resources_default() {
        let store = MemoryStore::new();
        let unit = test_unit("web", UnitCategory::StatefulSet, 3);
        StatefulSetAdapter.apply(&unit, &store).await.unwrap();

        let stored: StatefulSet = store.snapshot("default", "web").unwrap();
        let container = &stored.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.resources, Some(ResourceRequirements::default()));

        for _ in 0..2 {
            assert_eq!(
                StatefulSetAdapter.apply(&unit, &store).await.unwrap(),
                ApplyOutcome::Unchanged
            );
        }
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_drops_removed_resource_limits() {
        let store = MemoryStore::new();
        let mut limited = test_unit("web", UnitCategory::StatefulSet, 1);
        if let Some(spec) = limited.spec.template.spec.as_mut() {
            spec.containers[0].resources = Some(ResourceRequirements {
                limits: Some(BTreeMap::from([("cpu".to_string(), Quantity("500m".to_string()))])),
                ..Default::default()
            });
        }
        StatefulSetAdapter.apply(&limited, &store).await.unwrap();

        let unit = test_unit("web", UnitCategory::StatefulSet, 1);
        assert_eq!(
            StatefulSetAdapter.apply(&unit, &store).await.unwrap(),
            ApplyOutcome::Updated
        );
        let stored: StatefulSet = store.snapshot("default", "web").unwrap();
        let container = &stored.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(container.resources, Some(ResourceRequirements::default()));
    }

    #[tokio::test]
    async fn test_apply_converges_replicas() {
        let store = MemoryStore::new();
        let unit = test_unit("api", UnitCategory::Deployment, 2);
        DeploymentAdapter.apply(&unit, &store).await.unwrap();

        let scaled = test_unit("api", UnitCategory::Deployment, 5);
        assert_eq!(
            DeploymentAdapter.apply(&scaled, &store).await.unwrap(),
            ApplyOutcome::Updated
        );
        let stored: Deployment = store.snapshot("default", "api").unwrap();
        assert_eq!(stored.spec.unwrap().replicas, Some(5));
        assert_eq!(store.writes_for::<Deployment>()[1].verb, Verb::Replace);
    }

    #[tokio::test]
    async fn test_update_status_lists_live_pods() {
        let store = MemoryStore::new();
        let unit = test_unit("web", UnitCategory::StatefulSet, 2);
        StatefulSetAdapter.apply(&unit, &store).await.unwrap();

        for (name, phase) in [("web-1", "Running"), ("web-0", "Pending"), ("web-2", "Failed")] {
            let pod: Pod = serde_json::from_value(serde_json::json!({
                "metadata": {"name": name, "namespace": "default", "labels": {"app": "web"}},
                "spec": {"containers": [{"name": "main"}], "nodeName": "node-a"},
                "status": {"phase": phase, "podIP": "10.1.0.1",
                           "conditions": [{"type": "Ready", "status": "True"}]}
            }))
            .unwrap();
            store.seed(&pod).unwrap();
        }

        let fragment = StatefulSetAdapter
            .update_status(&unit, &store, &NoProbe)
            .await
            .unwrap();
        let StatusFragment::StatefulSet { pods, .. } = fragment else {
            panic!("expected a StatefulSet fragment");
        };
        let names: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["web-0", "web-1"]);
        assert!(pods[1].ready);
        assert_eq!(pods[1].node_name.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_update_status_missing_workload_fails() {
        let store = MemoryStore::new();
        let unit = test_unit("web", UnitCategory::StatefulSet, 1);
        let err = StatefulSetAdapter
            .update_status(&unit, &store, &NoProbe)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
