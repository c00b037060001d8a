use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use stratus_common::clients::{JobClient, SecretsClient};
use stratus_common::naming::task_registry_secret_prefix;
use stratus_common::{
    Result, ANNOTATION_APP_NAME, ANNOTATION_COMPLETION_CALLBACK, ANNOTATION_SPACE_NAME,
    LABEL_GUID,
};
use tracing::{debug, info, instrument};

use crate::{annotation, get_job};

/// Removes task Jobs and the pull secrets created for them
pub struct Deleter {
    jobs: Arc<dyn JobClient>,
    secrets: Arc<dyn SecretsClient>,
}

impl Deleter {
    /// Create a deleter
    pub fn new(jobs: Arc<dyn JobClient>, secrets: Arc<dyn SecretsClient>) -> Self {
        Self { jobs, secrets }
    }

    /// Delete the task with `guid`, returning its completion callback URL
    ///
    /// Secrets go first. If one cannot be deleted the Job is left in place so
    /// the next attempt still finds the secret reference.
    #[instrument(skip(self))]
    pub async fn delete(&self, guid: &str) -> Result<String> {
        let job = get_job(self.jobs.as_ref(), guid, true).await?;
        self.delete_job(&job).await
    }

    /// Delete an already fetched task Job
    pub(crate) async fn delete_job(&self, job: &Job) -> Result<String> {
        let namespace = job.metadata.namespace.clone().unwrap_or_default();
        let guid = job
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_GUID))
            .cloned()
            .unwrap_or_default();

        for secret in registry_secrets(job, &guid) {
            match self.secrets.delete(&namespace, &secret).await {
                Ok(()) => debug!(secret = %secret, "deleted registry secret"),
                Err(e) if e.is_not_found() => {
                    debug!(secret = %secret, "registry secret already gone")
                }
                Err(e) => return Err(e),
            }
        }

        let callback = annotation(job, ANNOTATION_COMPLETION_CALLBACK);

        if job
            .metadata
            .owner_references
            .as_ref()
            .is_some_and(|refs| !refs.is_empty())
        {
            debug!("job is owned, leaving deletion to its owner");
            return Ok(callback);
        }

        let name = job.metadata.name.clone().unwrap_or_default();
        self.jobs.delete(&namespace, &name).await?;
        info!(job = %name, "deleted task job");
        Ok(callback)
    }
}

/// Pull secrets of `job` that were generated for this task
fn registry_secrets(job: &Job, guid: &str) -> Vec<String> {
    let prefix = task_registry_secret_prefix(
        &annotation(job, ANNOTATION_APP_NAME),
        &annotation(job, ANNOTATION_SPACE_NAME),
        guid,
    );
    job.spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|pod| pod.image_pull_secrets.as_ref())
        .into_iter()
        .flatten()
        .map(|s| s.name.clone())
        .filter(|name| name.starts_with(&prefix))
        .collect()
}
