use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use stratus_common::clients::{JobClient, SecretsClient};
use stratus_common::model::Task;
use stratus_common::{Error, MultiError, Result};
use stratus_workload::registry::task_pull_secret;
use stratus_workload::{apply_options, DesireOption, TaskConverter};
use tracing::{info, instrument, warn};

/// Creates Jobs for tasks
pub struct Desirer {
    jobs: Arc<dyn JobClient>,
    secrets: Arc<dyn SecretsClient>,
    converter: Arc<dyn TaskConverter>,
}

impl Desirer {
    /// Create a desirer
    pub fn new(
        jobs: Arc<dyn JobClient>,
        secrets: Arc<dyn SecretsClient>,
        converter: Arc<dyn TaskConverter>,
    ) -> Self {
        Self {
            jobs,
            secrets,
            converter,
        }
    }

    /// Create the Job for `task` in `namespace`
    ///
    /// A private registry's pull secret is created first with a generated
    /// name. If the Job cannot be created the secret is deleted again; once the
    /// Job exists it becomes the secret's owner.
    #[instrument(skip(self, task, options), fields(guid = %task.guid))]
    pub async fn desire(
        &self,
        namespace: &str,
        task: &Task,
        options: &[DesireOption<Job>],
    ) -> Result<Job> {
        let secret = match task.private_registry.as_ref() {
            Some(registry) => {
                let secret = task_pull_secret(namespace, task, registry)?;
                Some(self.secrets.create(namespace, &secret).await?)
            }
            None => None,
        };
        let secret_name = secret.as_ref().and_then(|s| s.metadata.name.clone());

        let job = match self.create_job(namespace, task, secret_name.clone(), options).await {
            Ok(job) => job,
            Err(e) => {
                let Some(name) = secret_name else {
                    return Err(e);
                };
                warn!(secret = %name, "job creation failed, deleting registry secret");
                return Err(match self.secrets.delete(namespace, &name).await {
                    Ok(()) => e,
                    Err(cleanup) => {
                        let mut errors = MultiError::new();
                        errors.push(e);
                        errors.push(cleanup);
                        Error::Aggregate(errors)
                    }
                });
            }
        };

        if let Some(secret) = secret {
            self.secrets.set_owner(&secret, &owner_reference(&job)?).await?;
        }

        info!(job = job.metadata.name.as_deref().unwrap_or_default(), "desired task");
        Ok(job)
    }

    async fn create_job(
        &self,
        namespace: &str,
        task: &Task,
        registry_secret: Option<String>,
        options: &[DesireOption<Job>],
    ) -> Result<Job> {
        let mut job = self.converter.convert(task, registry_secret)?;
        apply_options(&mut job, options)?;
        job.metadata.namespace = Some(namespace.to_string());
        self.jobs.create(namespace, &job).await
    }
}

fn owner_reference(job: &Job) -> Result<OwnerReference> {
    let name = job.metadata.name.clone().unwrap_or_default();
    let uid = job
        .metadata
        .uid
        .clone()
        .ok_or_else(|| Error::validation(format!("job {name} has no uid")))?;
    Ok(OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        name,
        uid,
        ..Default::default()
    })
}
