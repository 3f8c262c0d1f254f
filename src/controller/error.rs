//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error not otherwise classified
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The object does not exist in the store
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Optimistic concurrency check failed
    #[error("Conflict writing {0}: object was modified concurrently")]
    Conflict(String),

    /// Create raced with another writer or a not-yet-visible object
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// The pre-delete hook did not complete
    #[error("Pre-delete hook failed: {0}")]
    PreDelete(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// One or more adapters failed during a reconcile pass
    #[error("{0}")]
    Adapters(AdapterFailures),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }

    /// Check if this error indicates an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, conflicts and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::NotFound { .. }
            | Error::Conflict(_)
            | Error::AlreadyExists(_)
            | Error::Transient(_)
            | Error::PreDelete(_) => true,
            Error::Validation(_) | Error::Serialization(_) => false,
            Error::Adapters(failures) => failures.any_retryable(),
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            // Don't requeue for non-retryable errors
            Duration::from_secs(3600)
        }
    }
}

/// A single adapter failure, tagged with the managed kind.
#[derive(Debug)]
pub struct AdapterFailure {
    /// Kind of the sub-resource whose adapter failed (e.g. "Service")
    pub kind: &'static str,
    /// Which contract step failed
    pub step: AdapterStep,
    pub error: Error,
}

/// Adapter contract step, used for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdapterStep {
    Apply,
    UpdateStatus,
}

impl fmt::Display for AdapterStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterStep::Apply => write!(f, "apply"),
            AdapterStep::UpdateStatus => write!(f, "update status"),
        }
    }
}

/// Aggregate of adapter failures from one reconcile pass.
#[derive(Debug, Default)]
pub struct AdapterFailures(pub Vec<AdapterFailure>);

impl AdapterFailures {
    pub fn push(&mut self, kind: &'static str, step: AdapterStep, error: Error) {
        self.0.push(AdapterFailure { kind, step, error });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AdapterFailure> {
        self.0.iter()
    }

    /// Failed steps without error text, e.g. "Service apply, Ingress update status".
    pub fn summary(&self) -> String {
        self.0
            .iter()
            .map(|f| format!("{} {}", f.kind, f.step))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn any_retryable(&self) -> bool {
        self.0.iter().any(|f| f.error.is_retryable())
    }
}

impl fmt::Display for AdapterFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} adapter operation(s) failed", self.0.len())?;
        for (i, failure) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{} {}: {}", sep, failure.kind, failure.step, failure.error)?;
        }
        Ok(())
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
