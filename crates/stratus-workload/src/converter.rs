//! Converter seams used by the desirers

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use stratus_common::model::{Lrp, Task};
use stratus_common::Result;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

/// Builds the StatefulSet for an LRP
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait LrpConverter: Send + Sync {
    /// Convert `lrp` into a StatefulSet ready for submission
    fn convert(&self, lrp: &Lrp) -> Result<StatefulSet>;
}

/// Builds the Job for a task
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait TaskConverter: Send + Sync {
    /// Convert `task` into a Job; `registry_secret` names a private registry
    /// pull secret created for this task
    fn convert(&self, task: &Task, registry_secret: Option<String>) -> Result<Job>;
}
