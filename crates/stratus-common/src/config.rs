//! Engine configuration
//!
//! Every tunable that the converters and background loops need is a field here
//! and is handed to constructors explicitly. Loaded from YAML; unspecified
//! fields take the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The YAML did not match the expected shape
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the reconciliation engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Namespace workloads are created in
    pub workloads_namespace: String,
    /// Restrict list/watch calls to `workloads_namespace` instead of the whole cluster
    pub namespaced: bool,
    /// Service account used by application and task pods
    pub application_service_account: String,
    /// Platform registry pull secret attached to every pod
    pub registry_secret_name: String,
    /// Allow images to run as root
    pub allow_run_image_as_root: bool,
    /// Mount the service account token into workload pods
    pub allow_automount_service_account_token: bool,
    /// Memory used when a request omits it
    pub default_memory_mb: i64,
    /// Disk used when a request omits it
    pub default_disk_mb: i64,
    /// CPU weight used when a request omits it
    pub default_cpu_weight: u8,
    /// Upper bound on task runtime
    pub task_active_deadline_seconds: i64,
    /// How often the route collector runs
    pub route_collector_interval_seconds: u64,
    /// Capacity of each outbound message channel
    pub channel_capacity: usize,
    /// How long completed task jobs are kept before deletion
    pub completed_task_ttl_seconds: u64,
    /// How often reported task jobs are re-checked for expiry
    pub task_sweep_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workloads_namespace: "cf-workloads".to_string(),
            namespaced: true,
            application_service_account: "stratus-app".to_string(),
            registry_secret_name: "app-registry-credentials".to_string(),
            allow_run_image_as_root: false,
            allow_automount_service_account_token: false,
            default_memory_mb: 256,
            default_disk_mb: 1024,
            default_cpu_weight: 0,
            task_active_deadline_seconds: 900,
            route_collector_interval_seconds: 30,
            channel_capacity: 64,
            completed_task_ttl_seconds: 300,
            task_sweep_interval_seconds: 60,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workloads_namespace.is_empty() {
            return Err(ConfigError::Invalid("workloadsNamespace must not be empty".into()));
        }
        if self.default_cpu_weight > 100 {
            return Err(ConfigError::Invalid("defaultCpuWeight must be between 0 and 100".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channelCapacity must be at least 1".into()));
        }
        if self.route_collector_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "routeCollectorIntervalSeconds must be at least 1".into(),
            ));
        }
        if self.task_sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "taskSweepIntervalSeconds must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Namespace scope for list/watch calls; `None` means cluster-wide
    pub fn watch_namespace(&self) -> Option<&str> {
        self.namespaced.then_some(self.workloads_namespace.as_str())
    }

    /// Route collector period
    pub fn route_collector_interval(&self) -> Duration {
        Duration::from_secs(self.route_collector_interval_seconds)
    }

    /// Retention of completed task jobs
    pub fn completed_task_ttl(&self) -> Duration {
        Duration::from_secs(self.completed_task_ttl_seconds)
    }

    /// Period of the completed task sweep
    pub fn task_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.task_sweep_interval_seconds)
    }
}
