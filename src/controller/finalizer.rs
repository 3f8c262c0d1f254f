//! Finalizer lifecycle for Units.
//!
//! ```text
//! Absent ──add token──▶ Active ──deletion requested──▶ Terminating ──hook ok, token removed──▶ Cleaned
//! ```
//!
//! The token is persisted in its own write before any owned object is
//! created, so a Unit can never be removed while its children are being made.
//! Once deletion is requested the pre-delete hook runs on every pass until it
//! succeeds; only then is the token removed and the store free to delete the
//! Unit and, through owner references, everything it owns.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controller::error::{Error, Result};
use crate::crd::Unit;
use crate::resources::common::unit_namespace;
use crate::store::{Notice, ResourceStore};

/// Default finalizer token
pub const DEFAULT_FINALIZER: &str = "storage.finalizers.tutorial.kubebuilder.io";

/// Position of a Unit in the finalizer lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    /// Not being deleted, token missing
    Absent,
    /// Not being deleted, token registered
    Active,
    /// Deletion requested, token still present
    Terminating,
    /// Deletion requested, token gone
    Cleaned,
}

impl FinalizerState {
    pub fn of(unit: &Unit, token: &str) -> Self {
        let has_token = unit.finalizers().iter().any(|f| f == token);
        match (unit.metadata.deletion_timestamp.is_some(), has_token) {
            (false, false) => FinalizerState::Absent,
            (false, true) => FinalizerState::Active,
            (true, true) => FinalizerState::Terminating,
            (true, false) => FinalizerState::Cleaned,
        }
    }
}

/// What the reconcile pass should do after the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    /// Token registered; apply owned resources
    Proceed,
    /// Token was just added; stop and run again
    Defer,
    /// Unit is being deleted and no longer needs work
    Released,
}

/// Cleanup run once per pass while a Unit is terminating.
///
/// Must be idempotent: it runs again on every pass until it returns `Ok`.
#[async_trait]
pub trait PreDeleteHook: Send + Sync {
    async fn run(&self, unit: &Unit) -> Result<()>;
}

/// Hook that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPreDelete;

#[async_trait]
impl PreDeleteHook for NoopPreDelete {
    async fn run(&self, _unit: &Unit) -> Result<()> {
        Ok(())
    }
}

/// Drives a Unit through [`FinalizerState`].
#[derive(Clone, Debug)]
pub struct FinalizerLifecycle<H = NoopPreDelete> {
    token: String,
    hook: H,
}

impl Default for FinalizerLifecycle {
    fn default() -> Self {
        Self::new(DEFAULT_FINALIZER, NoopPreDelete)
    }
}

impl<H: PreDeleteHook> FinalizerLifecycle<H> {
    pub fn new(token: impl Into<String>, hook: H) -> Self {
        Self {
            token: token.into(),
            hook,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn state(&self, unit: &Unit) -> FinalizerState {
        FinalizerState::of(unit, &self.token)
    }

    /// Advance the lifecycle by at most one persisted step.
    pub async fn gate<S: ResourceStore>(&self, unit: &Unit, store: &S) -> Result<Gate> {
        let name = unit.name_any();
        let namespace = unit_namespace(unit);

        match self.state(unit) {
            FinalizerState::Active => Ok(Gate::Proceed),
            FinalizerState::Absent => {
                info!(%name, %namespace, token = %self.token, "Adding finalizer");
                let mut updated = unit.clone();
                updated.finalizers_mut().push(self.token.clone());
                store.replace(&namespace, &updated).await?;
                Ok(Gate::Defer)
            }
            FinalizerState::Terminating => {
                info!(%name, %namespace, "Running pre-delete hook");
                if let Err(e) = self.hook.run(unit).await {
                    warn!(%name, %namespace, error = %e, "Pre-delete hook failed");
                    store
                        .publish_notice(
                            unit,
                            Notice::warning("PreDeleteFailed", "Deleting", e.to_string()),
                        )
                        .await;
                    return Err(match e {
                        Error::PreDelete(_) => e,
                        other => Error::PreDelete(other.to_string()),
                    });
                }

                let mut updated = unit.clone();
                updated.finalizers_mut().retain(|f| f != &self.token);
                store.replace(&namespace, &updated).await?;
                info!(%name, %namespace, "Finalizer removed");
                Ok(Gate::Released)
            }
            FinalizerState::Cleaned => {
                debug!(%name, %namespace, "Awaiting removal by the store");
                Ok(Gate::Released)
            }
        }
    }
}
