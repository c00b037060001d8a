//! Common types for stratus: model, errors, naming, configuration and the
//! Kubernetes collaborator seams shared by every component crate.

#![deny(missing_docs)]

pub mod clients;
pub mod config;
pub mod error;
pub mod kube_clients;
pub mod model;
pub mod naming;
pub mod telemetry;
pub mod watch;

pub use config::Config;
pub use error::{Error, MultiError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Persisted state layout: labels
// =============================================================================

/// Label carrying the LRP or task GUID
pub const LABEL_GUID: &str = "guid";

/// Label carrying the LRP version
pub const LABEL_VERSION: &str = "version";

/// Label carrying the [`model::SourceType`]
pub const LABEL_SOURCE_TYPE: &str = "source-type";

/// Label carrying the application GUID
pub const LABEL_APP_GUID: &str = "app-guid";

/// Label carrying the process type (web, worker, ...)
pub const LABEL_PROCESS_TYPE: &str = "process-type";

/// Label set on task jobs once their completion has been reported
pub const LABEL_TASK_COMPLETED: &str = "task-completed";

/// Value of [`LABEL_TASK_COMPLETED`] for reported jobs
pub const TASK_COMPLETED_TRUE: &str = "true";

// =============================================================================
// Persisted state layout: annotations
// =============================================================================

/// JSON array of `{hostname, port}` currently desired
pub const ANNOTATION_REGISTERED_ROUTES: &str = "registered-routes";

/// JSON array of `{hostname, port}` removed by the last update
pub const ANNOTATION_UNREGISTERED_ROUTES: &str = "unregistered-routes";

/// Opaque caller-chosen change-detection token
pub const ANNOTATION_LAST_UPDATED: &str = "last-updated";

/// `GUID-Version` of the LRP
pub const ANNOTATION_PROCESS_GUID: &str = "process-guid";

/// Completion callback URL on task jobs
pub const ANNOTATION_COMPLETION_CALLBACK: &str = "completion-callback";

/// Application name
pub const ANNOTATION_APP_NAME: &str = "app-name";

/// Application GUID
pub const ANNOTATION_APP_GUID: &str = "app-guid";

/// Space name
pub const ANNOTATION_SPACE_NAME: &str = "space-name";

/// Space GUID
pub const ANNOTATION_SPACE_GUID: &str = "space-guid";

/// Org name
pub const ANNOTATION_ORG_NAME: &str = "org-name";

/// Org GUID
pub const ANNOTATION_ORG_GUID: &str = "org-guid";

/// LRP version
pub const ANNOTATION_VERSION: &str = "version";

// =============================================================================
// Container and workload constants
// =============================================================================

/// Name of the application container in LRP pods
pub const APP_CONTAINER_NAME: &str = "opi";

/// Name of the task container in task pods
pub const TASK_CONTAINER_NAME: &str = "opi-task";

/// Field manager used for writes
pub const FIELD_MANAGER: &str = "stratus-controller";
