use std::sync::Arc;

use k8s_openapi::api::batch::v1::Job;
use stratus_common::clients::JobClient;
use stratus_common::model::{ExecutionStatus, Task, TaskStatus};
use stratus_common::{
    Result, ANNOTATION_APP_GUID, ANNOTATION_APP_NAME, ANNOTATION_COMPLETION_CALLBACK,
    ANNOTATION_ORG_GUID, ANNOTATION_ORG_NAME, ANNOTATION_SPACE_GUID, ANNOTATION_SPACE_NAME,
    LABEL_GUID, TASK_CONTAINER_NAME,
};
use tracing::instrument;

use crate::{annotation, get_job};

/// Reads tasks back from their Jobs
pub struct Getter {
    jobs: Arc<dyn JobClient>,
}

impl Getter {
    /// Create a getter
    pub fn new(jobs: Arc<dyn JobClient>) -> Self {
        Self { jobs }
    }

    /// The running task with `guid`
    #[instrument(skip(self))]
    pub async fn get(&self, guid: &str) -> Result<Task> {
        let job = get_job(self.jobs.as_ref(), guid, false).await?;
        Ok(job_to_task(&job))
    }

    /// Every task not yet reported complete
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Task>> {
        let jobs = self.jobs.list(false).await?;
        Ok(jobs.iter().map(job_to_task).collect())
    }

    /// Execution status of the task with `guid`, completed ones included
    #[instrument(skip(self))]
    pub async fn status(&self, guid: &str) -> Result<TaskStatus> {
        let job = get_job(self.jobs.as_ref(), guid, true).await?;
        Ok(job_status(&job))
    }
}

/// Reconstruct the task a Job materializes
pub fn job_to_task(job: &Job) -> Task {
    let container = job
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|pod| {
            pod.containers
                .iter()
                .find(|c| c.name == TASK_CONTAINER_NAME)
                .or_else(|| pod.containers.first())
        });

    Task {
        guid: job
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_GUID))
            .cloned()
            .unwrap_or_default(),
        app_guid: annotation(job, ANNOTATION_APP_GUID),
        app_name: annotation(job, ANNOTATION_APP_NAME),
        space_guid: annotation(job, ANNOTATION_SPACE_GUID),
        space_name: annotation(job, ANNOTATION_SPACE_NAME),
        org_guid: annotation(job, ANNOTATION_ORG_GUID),
        org_name: annotation(job, ANNOTATION_ORG_NAME),
        completion_callback: annotation(job, ANNOTATION_COMPLETION_CALLBACK),
        image: container.and_then(|c| c.image.clone()).unwrap_or_default(),
        command: container.and_then(|c| c.command.clone()).unwrap_or_default(),
        env: container
            .and_then(|c| c.env.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|e| e.value.clone().map(|v| (e.name.clone(), v)))
            .collect(),
        ..Default::default()
    }
}

/// Execution status derived from Job status
///
/// A failed Job ends at its most recent `Failed` condition.
pub fn job_status(job: &Job) -> TaskStatus {
    let Some(status) = job.status.as_ref() else {
        return TaskStatus::default();
    };
    let start_time = status.start_time.as_ref().map(|t| t.0.to_rfc3339());

    if status.succeeded.unwrap_or(0) > 0 {
        if let Some(end) = status.completion_time.as_ref() {
            return TaskStatus {
                execution_status: ExecutionStatus::Succeeded,
                start_time,
                end_time: Some(end.0.to_rfc3339()),
            };
        }
    }

    if status.failed.unwrap_or(0) > 0 {
        let end_time = status
            .conditions
            .iter()
            .flatten()
            .filter(|c| c.type_ == "Failed")
            .filter_map(|c| c.last_transition_time.as_ref())
            .max_by_key(|t| t.0)
            .map(|t| t.0.to_rfc3339());
        return TaskStatus {
            execution_status: ExecutionStatus::Failed,
            start_time,
            end_time,
        };
    }

    if start_time.is_some() {
        return TaskStatus {
            execution_status: ExecutionStatus::Running,
            start_time,
            end_time: None,
        };
    }

    TaskStatus::default()
}
