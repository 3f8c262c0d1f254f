//! Operator configuration.
//!
//! All settings come from environment variables so they can be set from the
//! operator Deployment manifest:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `WATCH_NAMESPACE` | unset (cluster-wide) | Restrict the controller to one namespace |
//! | `PROBE_TIMEOUT_MS` | `20` | Service port probe deadline |
//! | `HEALTH_PORT` | `8080` | Port of the health and metrics server |
//! | `UNIT_FINALIZER` | `storage.finalizers.tutorial.kubebuilder.io` | Finalizer token |
//! | `DEFER_REQUEUE_SECS` | `1` | Delay before the pass following a finalizer write |
//! | `POD_NAME` | unset | Instance name reported on published events |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::controller::finalizer::DEFAULT_FINALIZER;
use crate::probe::DEFAULT_PROBE_TIMEOUT;

/// Configuration error raised at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings of the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    pub watch_namespace: Option<String>,
    pub probe_timeout: Duration,
    pub health_port: u16,
    pub finalizer: String,
    pub defer_requeue: Duration,
    pub pod_name: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            health_port: 8080,
            finalizer: DEFAULT_FINALIZER.to_string(),
            defer_requeue: Duration::from_secs(1),
            pod_name: None,
        }
    }
}

impl OperatorConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            watch_namespace: get("WATCH_NAMESPACE"),
            probe_timeout: parse::<u64>(&get, "PROBE_TIMEOUT_MS")?
                .map_or(defaults.probe_timeout, Duration::from_millis),
            health_port: parse::<u16>(&get, "HEALTH_PORT")?.unwrap_or(defaults.health_port),
            finalizer: get("UNIT_FINALIZER").unwrap_or(defaults.finalizer),
            defer_requeue: parse::<u64>(&get, "DEFER_REQUEUE_SECS")?
                .map_or(defaults.defer_requeue, Duration::from_secs),
            pod_name: get("POD_NAME"),
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
