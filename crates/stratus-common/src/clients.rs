//! Collaborator seams onto the Kubernetes API
//!
//! The engine never talks to kube-rs directly; it goes through these traits so
//! every operation can be exercised against a double. Production
//! implementations live in [`crate::kube_clients`].

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Event, Pod, Secret};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

#[cfg(any(test, feature = "mock"))]
use mockall::automock;

use crate::model::{LrpIdentifier, SourceType};
use crate::Result;

/// StatefulSet operations used for LRPs
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait WorkloadClient: Send + Sync {
    /// Create a StatefulSet; an existing one yields [`crate::Error::AlreadyExists`]
    async fn create(&self, namespace: &str, statefulset: &StatefulSet) -> Result<StatefulSet>;

    /// Replace a StatefulSet, guarded by its resourceVersion
    async fn update(&self, namespace: &str, statefulset: &StatefulSet) -> Result<StatefulSet>;

    /// Delete a StatefulSet with background propagation
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// List StatefulSets labelled with `source_type`
    async fn get_by_source_type(&self, source_type: SourceType) -> Result<Vec<StatefulSet>>;

    /// List StatefulSets labelled with the identifier's guid and version
    async fn get_by_identifier(&self, id: &LrpIdentifier) -> Result<Vec<StatefulSet>>;
}

/// Pod operations
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// List all application pods in scope
    async fn get_all(&self) -> Result<Vec<Pod>>;

    /// List the pods of one LRP
    async fn get_by_identifier(&self, id: &LrpIdentifier) -> Result<Vec<Pod>>;

    /// Delete a single pod
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Secret operations
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait SecretsClient: Send + Sync {
    /// Create a secret, returning the stored object (with its generated name)
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    /// Delete a secret by name
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Add `owner` to the secret's owner references
    async fn set_owner(&self, secret: &Secret, owner: &OwnerReference) -> Result<Secret>;
}

/// Kubernetes Event lookups
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait EventsClient: Send + Sync {
    /// Events whose involved object is `pod`, oldest first
    async fn get_by_pod(&self, pod: &Pod) -> Result<Vec<Event>>;
}

/// Job operations used for tasks
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Create a Job; an existing one yields [`crate::Error::AlreadyExists`]
    async fn create(&self, namespace: &str, job: &Job) -> Result<Job>;

    /// List task jobs, optionally including ones already reported complete
    async fn list(&self, include_completed: bool) -> Result<Vec<Job>>;

    /// List task jobs labelled with `guid`
    async fn get_by_guid(&self, guid: &str, include_completed: bool) -> Result<Vec<Job>>;

    /// Delete a Job with background propagation
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;

    /// Set a label on a Job
    async fn set_label(&self, job: &Job, key: &str, value: &str) -> Result<Job>;
}

/// PodDisruptionBudget operations guarding multi-instance LRPs
#[cfg_attr(any(test, feature = "mock"), automock)]
#[async_trait]
pub trait PodDisruptionBudgetClient: Send + Sync {
    /// Create a budget; an existing one yields [`crate::Error::AlreadyExists`]
    async fn create(
        &self,
        namespace: &str,
        budget: &PodDisruptionBudget,
    ) -> Result<PodDisruptionBudget>;

    /// Delete a budget by name
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}
