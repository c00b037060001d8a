//! Abstract LRP and Task model submitted by the Cloud Controller
//!
//! These are plain values: created per request, converted, and discarded. The
//! durable state lives on the Kubernetes workload objects.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a long-running process
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LrpIdentifier {
    /// Process GUID
    pub guid: String,
    /// Process version
    pub version: String,
}

impl LrpIdentifier {
    /// Create an identifier from its parts
    pub fn new(guid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            version: version.into(),
        }
    }

    /// The externally visible process GUID (`GUID-Version`)
    pub fn process_guid(&self) -> String {
        format!("{}-{}", self.guid, self.version)
    }
}

impl fmt::Display for LrpIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.guid, self.version)
    }
}

/// Value of the `source-type` label
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    /// Long-running application process
    App,
    /// One-off task
    Task,
    /// Staging task
    Stg,
}

impl SourceType {
    /// Label value as stored on the workload object
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::App => "APP",
            Self::Task => "TASK",
            Self::Stg => "STG",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single route to register with the router
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Route {
    /// Fully-qualified hostname
    pub hostname: String,
    /// Container port the route targets
    pub port: i32,
}

impl Route {
    /// Create a route
    pub fn new(hostname: impl Into<String>, port: i32) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

/// Canonical set form of a route list
pub type RouteSet = BTreeSet<Route>;

/// Encode a route list into the annotation representation (JSON array)
pub fn encode_routes<'a>(
    routes: impl IntoIterator<Item = &'a Route>,
) -> Result<String, serde_json::Error> {
    let routes: Vec<&Route> = routes.into_iter().collect();
    serde_json::to_string(&routes)
}

/// Decode an annotation value into a route set
///
/// An empty string decodes to the empty set; duplicates collapse.
pub fn decode_routes(raw: &str) -> Result<RouteSet, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(RouteSet::new());
    }
    let routes: Vec<Route> = serde_json::from_str(raw)?;
    Ok(routes.into_iter().collect())
}

/// Healthcheck description
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// `http`, `port`, or anything else for "no probe"
    #[serde(rename = "type")]
    pub type_: String,
    /// HTTP path, only used by `http`
    pub endpoint: String,
    /// Port checked
    pub port: i32,
    /// Probe timeout in milliseconds
    pub timeout_ms: u32,
}

/// Credentials for a private image registry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateRegistry {
    /// Registry server, e.g. `registry.example.com`
    pub server: String,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for PrivateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateRegistry")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persistent volume claim mounted into the application container
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Mount path inside the container
    pub mount_path: String,
    /// Name of an existing PersistentVolumeClaim
    pub claim_name: String,
}

/// Lifecycle-specific container setup
///
/// Its environment overrides win over both platform-injected values and the
/// caller-supplied environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Image runs as-is
    #[default]
    Docker,
    /// Buildpack droplet started through the launcher
    Buildpack {
        /// Start command handed to the launcher
        start_command: String,
    },
    /// Staging run producing a droplet
    Staging {
        /// Where the droplet is written
        droplet_path: String,
    },
}

/// Long-running process
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Lrp {
    /// Identity
    pub id: LrpIdentifier,
    /// Process type, e.g. `web`
    pub process_type: String,
    /// Application GUID
    pub app_guid: String,
    /// Application name
    pub app_name: String,
    /// Space GUID
    pub space_guid: String,
    /// Space name
    pub space_name: String,
    /// Org GUID
    pub org_guid: String,
    /// Org name
    pub org_name: String,
    /// Container image
    pub image: String,
    /// Container command
    pub command: Vec<String>,
    /// Caller-supplied environment
    pub env: BTreeMap<String, String>,
    /// Container ports
    pub ports: Vec<i32>,
    /// Healthcheck
    pub health: Healthcheck,
    /// Desired instance count
    pub target_instances: i32,
    /// Ready instances; only populated on read paths
    pub running_instances: i32,
    /// Memory limit in MB
    pub memory_mb: i64,
    /// Ephemeral disk limit in MB
    pub disk_mb: i64,
    /// CPU weight, 0-100
    pub cpu_weight: u8,
    /// Volume mounts
    pub volume_mounts: Vec<VolumeMount>,
    /// Routes to register
    pub app_uris: Vec<Route>,
    /// Private registry credentials
    pub private_registry: Option<PrivateRegistry>,
    /// Opaque change-detection token
    pub last_updated: String,
    /// Lifecycle overrides
    pub lifecycle: Lifecycle,
    /// Free-form annotations passed through to the workload object
    pub metadata: BTreeMap<String, String>,
}

/// One-off task
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task GUID
    pub guid: String,
    /// Optional task name, appended to the job name
    pub name: String,
    /// Application GUID
    pub app_guid: String,
    /// Application name
    pub app_name: String,
    /// Space GUID
    pub space_guid: String,
    /// Space name
    pub space_name: String,
    /// Org GUID
    pub org_guid: String,
    /// Org name
    pub org_name: String,
    /// Container image
    pub image: String,
    /// Container command
    pub command: Vec<String>,
    /// Caller-supplied environment
    pub env: BTreeMap<String, String>,
    /// Memory limit in MB
    pub memory_mb: i64,
    /// Ephemeral disk limit in MB
    pub disk_mb: i64,
    /// CPU weight, 0-100
    pub cpu_weight: u8,
    /// URL the Cloud Controller wants called on completion
    pub completion_callback: String,
    /// Private registry credentials
    pub private_registry: Option<PrivateRegistry>,
    /// Lifecycle overrides
    pub lifecycle: Lifecycle,
}

/// Instance state as reported to the Cloud Controller
pub mod instance_state {
    /// Container is up and ready
    pub const RUNNING: &str = "RUNNING";
    /// Scheduled or starting
    pub const CLAIMED: &str = "CLAIMED";
    /// Exited or failing to start
    pub const CRASHED: &str = "CRASHED";
    /// Phase could not be determined
    pub const UNKNOWN: &str = "UNKNOWN";
    /// Placement error reported when the scheduler is out of memory
    pub const INSUFFICIENT_MEMORY: &str = "insufficient resources: memory";
}

/// One running (or failing) instance of an LRP
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance index parsed from the pod name
    pub index: i32,
    /// Pod start time in unix nanoseconds, 0 if not started
    pub since: i64,
    /// One of [`instance_state`]
    pub state: String,
    /// Scheduling problem, if any
    pub placement_error: String,
}

/// Execution status of a task
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Job created, no pod active yet
    #[default]
    Starting,
    /// Pod running
    Running,
    /// Completed successfully
    Succeeded,
    /// Failed or exceeded its deadline
    Failed,
}

/// Observed task status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Execution status
    pub execution_status: ExecutionStatus,
    /// RFC 3339 start time
    pub start_time: Option<String>,
    /// RFC 3339 completion time
    pub end_time: Option<String>,
}

/// Route registration payload
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routes {
    /// Hostnames to register
    pub registered_routes: Vec<String>,
    /// Hostnames to unregister
    pub unregistered_routes: Vec<String>,
}

/// Message emitted towards the router transport
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMessage {
    /// Pod name
    pub instance_id: String,
    /// Process GUID label of the pod
    pub name: String,
    /// Pod IP
    pub address: String,
    /// Container port
    pub port: u32,
    /// TLS port, 0 when not used
    pub tls_port: u32,
    /// Routes to (un)register
    pub routes: Routes,
}

/// Crash report for the Cloud Controller
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    /// `GUID-Version`
    pub process_guid: String,
    /// Pod name
    pub instance: String,
    /// Instance index
    pub index: i32,
    /// Kubernetes reason, e.g. `CrashLoopBackOff`
    pub reason: String,
    /// Container exit code
    pub exit_status: i32,
    /// Human readable exit description
    pub exit_description: String,
    /// Container restart count
    pub crash_count: i32,
    /// Unix seconds of the crashed run's start
    pub crash_timestamp: i64,
}

/// Completion notice for a finished task
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCompletion {
    /// Task GUID
    pub guid: String,
    /// URL to call back
    pub callback_url: String,
    /// Whether the task failed
    pub failed: bool,
    /// Failure reason, empty on success
    pub failure_reason: String,
}
