//! Status management utilities.
//!
//! [`StatusAggregator`] folds the fragments reported by each adapter into a
//! copy of the Unit's persisted status. It starts from the previous status so
//! an adapter whose status read failed keeps its last observation, and it
//! clears the slots of adapters that are no longer part of the Unit.
//! [`ConditionBuilder`] keeps `lastTransitionTime` stable while a condition's
//! status does not flip, which lets an unchanged pass compare equal.

use crate::controller::error::AdapterFailures;
use crate::crd::{CONDITION_DEGRADED, CONDITION_READY, Condition, UnitStatus};
use crate::resources::{StatusFragment, UnitAdapter};

/// Builder for managing conditions list
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
}

impl ConditionBuilder {
    /// Create a new condition builder
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Start from previously persisted conditions
    pub fn from_existing(conditions: &[Condition]) -> Self {
        Self {
            conditions: conditions.to_vec(),
        }
    }

    /// Add or update a condition.
    ///
    /// An identical condition is left untouched. When only reason or message
    /// change, the previous transition time is kept.
    pub fn set(&mut self, condition: Condition) -> &mut Self {
        if let Some(existing) = self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            if existing.same_state(&condition) {
                return self;
            }
            let transition = if existing.status == condition.status {
                existing.last_transition_time.clone()
            } else {
                condition.last_transition_time.clone()
            };
            *existing = condition;
            existing.last_transition_time = transition;
        } else {
            self.conditions.push(condition);
        }
        self
    }

    /// Set Ready condition
    pub fn ready(
        &mut self,
        ready: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::ready(ready, reason, message, generation))
    }

    /// Set Degraded condition
    pub fn degraded(
        &mut self,
        degraded: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> &mut Self {
        self.set(Condition::degraded(degraded, reason, message, generation))
    }

    /// Build the conditions list
    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

impl Default for ConditionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a condition type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .find(|c| c.r#type == condition_type)
        .is_some_and(|c| c.status == "True")
}

/// Accumulates one pass worth of observed status.
#[derive(Debug)]
pub struct StatusAggregator {
    status: UnitStatus,
}

impl StatusAggregator {
    /// Start from the persisted status, dropping slots no adapter in `adapters` owns.
    pub fn new(previous: Option<&UnitStatus>, adapters: &[UnitAdapter]) -> Self {
        let mut status = previous.cloned().unwrap_or_default();
        let has = |pred: fn(&UnitAdapter) -> bool| adapters.iter().any(pred);

        if !has(|a| matches!(a, UnitAdapter::StatefulSet(_))) {
            status.base_stateful_set = None;
        }
        if !has(|a| matches!(a, UnitAdapter::Deployment(_))) {
            status.base_deployment = None;
        }
        let relation = &mut status.relation_resource_status;
        if !has(|a| matches!(a, UnitAdapter::Service(_))) {
            relation.service = None;
            relation.endpoint.clear();
        }
        if !has(|a| matches!(a, UnitAdapter::Ingress(_))) {
            relation.ingress = None;
        }
        if !has(|a| matches!(a, UnitAdapter::Pvc(_))) {
            relation.pvc = None;
        }

        Self { status }
    }

    /// Merge one adapter's fragment.
    pub fn merge(&mut self, fragment: StatusFragment) {
        let relation = &mut self.status.relation_resource_status;
        match fragment {
            StatusFragment::StatefulSet { status, pods } => {
                self.status.base_stateful_set = status;
                self.status.pods = pods;
            }
            StatusFragment::Deployment { status, pods } => {
                self.status.base_deployment = status;
                self.status.pods = pods;
            }
            StatusFragment::Service { service, endpoints } => {
                relation.service = Some(service);
                // No usable first subset: keep what was last seen
                if let Some(endpoints) = endpoints {
                    relation.endpoint = endpoints;
                }
            }
            StatusFragment::Ingress(ingress) => relation.ingress = ingress,
            StatusFragment::Pvc(pvc) => relation.pvc = pvc,
        }
    }

    /// Ready replicas reported by whichever primary workload is present.
    pub fn ready_replicas(&self) -> i32 {
        self.status
            .base_stateful_set
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .or_else(|| {
                self.status
                    .base_deployment
                    .as_ref()
                    .and_then(|s| s.ready_replicas)
            })
            .unwrap_or(0)
    }

    /// Derive the Ready and Degraded conditions and return the merged status.
    pub fn finish(
        self,
        desired_replicas: i32,
        failures: &AdapterFailures,
        generation: Option<i64>,
    ) -> UnitStatus {
        let ready_replicas = self.ready_replicas();
        let mut status = self.status;
        let mut conditions = ConditionBuilder::from_existing(&status.conditions);

        if failures.is_empty() {
            conditions.degraded(false, "Reconciled", "All resources applied", generation);
            if ready_replicas >= desired_replicas {
                conditions.ready(
                    true,
                    "AllReplicasReady",
                    &format!("{}/{} replicas ready", ready_replicas, desired_replicas),
                    generation,
                );
            } else {
                conditions.ready(
                    false,
                    "WaitingForReplicas",
                    &format!("{}/{} replicas ready", ready_replicas, desired_replicas),
                    generation,
                );
            }
        } else {
            // Error text varies between passes and lives in the warning event
            conditions.degraded(
                true,
                "AdapterFailed",
                &format!("Failed: {}", failures.summary()),
                generation,
            );
            conditions.ready(false, "AdapterFailed", "Not all resources converged", generation);
        }

        status.conditions = conditions.build();
        status
    }
}
