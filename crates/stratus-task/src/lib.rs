//! Task lifecycle over Jobs
//!
//! Tasks run once: [`Desirer`] creates the Job, [`Getter`] reads it back,
//! [`Deleter`] removes it together with the pull secret this engine created,
//! and [`CompletionReconciler`] reports finished tasks to the Cloud Controller
//! and garbage-collects them after a retention period.

#![deny(missing_docs)]

mod completion;
mod delete;
mod desire;
mod get;

pub use completion::CompletionReconciler;
pub use delete::Deleter;
pub use desire::Desirer;
pub use get::{job_status, job_to_task, Getter};

use k8s_openapi::api::batch::v1::Job;
use stratus_common::clients::JobClient;
use stratus_common::{Error, Result};

/// Fetch the single Job labelled with `guid`
pub(crate) async fn get_job(
    jobs: &dyn JobClient,
    guid: &str,
    include_completed: bool,
) -> Result<Job> {
    let mut found = jobs.get_by_guid(guid, include_completed).await?;
    match found.len() {
        0 => Err(Error::not_found("Job", guid)),
        1 => Ok(found.remove(0)),
        _ => Err(Error::MultipleWorkloads {
            kind: "Job".to_string(),
            guid: guid.to_string(),
        }),
    }
}

/// Read an annotation, empty when absent
pub(crate) fn annotation(job: &Job, key: &str) -> String {
    job.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .cloned()
        .unwrap_or_default()
}
