use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use k8s_openapi::api::batch::v1::{Job, JobCondition};
use kube::runtime::watcher::{self, Event};
use stratus_common::clients::JobClient;
use stratus_common::model::{ExecutionStatus, TaskCompletion};
use stratus_common::{
    Error, Result, ANNOTATION_COMPLETION_CALLBACK, LABEL_GUID, LABEL_TASK_COMPLETED,
    TASK_COMPLETED_TRUE,
};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::delete::Deleter;
use crate::{annotation, job_status};

/// Reports finished tasks and removes them once their retention has passed
pub struct CompletionReconciler {
    jobs: Arc<dyn JobClient>,
    deleter: Arc<Deleter>,
    completions: mpsc::Sender<TaskCompletion>,
    ttl: Duration,
}

impl CompletionReconciler {
    /// Create a reconciler sending completions to `completions`
    pub fn new(
        jobs: Arc<dyn JobClient>,
        deleter: Arc<Deleter>,
        completions: mpsc::Sender<TaskCompletion>,
        ttl: Duration,
    ) -> Self {
        Self {
            jobs,
            deleter,
            completions,
            ttl,
        }
    }

    /// Bring one task Job forward
    ///
    /// Unfinished Jobs are left alone. A finished Job is reported once, then
    /// labelled; a labelled Job is deleted after the TTL.
    #[instrument(skip(self, job), fields(job = job.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn reconcile(&self, job: &Job) -> Result<()> {
        let status = job_status(job);
        if !matches!(
            status.execution_status,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed
        ) {
            return Ok(());
        }

        if !is_reported(job) {
            let failed = status.execution_status == ExecutionStatus::Failed;
            let completion = TaskCompletion {
                guid: guid(job),
                callback_url: annotation(job, ANNOTATION_COMPLETION_CALLBACK),
                failed,
                failure_reason: if failed { failure_reason(job) } else { String::new() },
            };
            info!(guid = %completion.guid, failed, "task finished");
            self.completions
                .send(completion)
                .await
                .map_err(|_| Error::ChannelClosed("task completion".to_string()))?;
            self.jobs
                .set_label(job, LABEL_TASK_COMPLETED, TASK_COMPLETED_TRUE)
                .await?;
            return Ok(());
        }

        if self.expired(job, Utc::now()) {
            match self.deleter.delete_job(job).await {
                Ok(_) => info!(guid = %guid(job), "deleted expired task"),
                Err(e) if e.is_not_found() => debug!("expired task already gone"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drive the reconciler from a Job watch stream, sweeping completed Jobs
    /// every `sweep_interval`
    ///
    /// Returns when the watch stream ends or the completion channel closes.
    pub async fn run<S>(&self, events: S, sweep_interval: Duration)
    where
        S: Stream<Item = std::result::Result<Event<Job>, watcher::Error>>,
    {
        let mut events = std::pin::pin!(events);
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("task completion reconciler started");

        loop {
            tokio::select! {
                event = events.next() => {
                    let job = match event {
                        Some(Ok(Event::Apply(job))) | Some(Ok(Event::InitApply(job))) => job,
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            warn!(error = %e, "job watch error");
                            continue;
                        }
                        None => break,
                    };
                    if self.handle(&job).await.is_break() {
                        break;
                    }
                }
                _ = sweep.tick() => {
                    let jobs = match self.jobs.list(true).await {
                        Ok(jobs) => jobs,
                        Err(e) => {
                            warn!(error = %e, "failed to list task jobs for sweep");
                            continue;
                        }
                    };
                    for job in jobs.iter().filter(|j| is_reported(j)) {
                        if self.handle(job).await.is_break() {
                            return;
                        }
                    }
                }
            }
        }

        info!("task completion reconciler stopped");
    }

    async fn handle(&self, job: &Job) -> std::ops::ControlFlow<()> {
        match self.reconcile(job).await {
            Err(Error::ChannelClosed(what)) => {
                warn!(channel = %what, "consumer gone, stopping");
                std::ops::ControlFlow::Break(())
            }
            Err(e) => {
                warn!(error = %e, "failed to reconcile task job");
                std::ops::ControlFlow::Continue(())
            }
            Ok(()) => std::ops::ControlFlow::Continue(()),
        }
    }

    fn expired(&self, job: &Job, now: DateTime<Utc>) -> bool {
        let Some(finished) = finished_at(job) else {
            return false;
        };
        let Ok(ttl) = chrono::Duration::from_std(self.ttl) else {
            return false;
        };
        finished + ttl <= now
    }
}

fn guid(job: &Job) -> String {
    job.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_GUID))
        .cloned()
        .unwrap_or_default()
}

fn is_reported(job: &Job) -> bool {
    job.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_TASK_COMPLETED))
        .is_some_and(|v| v == TASK_COMPLETED_TRUE)
}

fn failed_conditions(job: &Job) -> impl Iterator<Item = &JobCondition> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .filter(|c| c.type_ == "Failed")
}

fn failure_reason(job: &Job) -> String {
    failed_conditions(job)
        .max_by_key(|c| c.last_transition_time.as_ref().map(|t| t.0))
        .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
        .unwrap_or_else(|| "task failed".to_string())
}

fn finished_at(job: &Job) -> Option<DateTime<Utc>> {
    job.status
        .as_ref()
        .and_then(|s| s.completion_time.as_ref())
        .map(|t| t.0)
        .or_else(|| {
            failed_conditions(job)
                .filter_map(|c| c.last_transition_time.as_ref())
                .map(|t| t.0)
                .max()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use k8s_openapi::api::batch::v1::JobStatus;
    use k8s_openapi::api::core::v1::LocalObjectReference;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use stratus_common::clients::{MockJobClient, MockSecretsClient};

    use crate::fixtures::{stored, GUID, NAMESPACE};

    const TTL: Duration = Duration::from_secs(300);

    fn succeeded(finished: DateTime<Utc>) -> Job {
        let mut job = stored(None);
        job.status = Some(JobStatus {
            start_time: Some(Time(finished - chrono::Duration::seconds(10))),
            completion_time: Some(Time(finished)),
            succeeded: Some(1),
            ..Default::default()
        });
        job
    }

    fn failed(finished: DateTime<Utc>) -> Job {
        let mut job = stored(None);
        job.status = Some(JobStatus {
            start_time: Some(Time(finished - chrono::Duration::seconds(10))),
            failed: Some(1),
            conditions: Some(vec![JobCondition {
                type_: "Failed".to_string(),
                status: "True".to_string(),
                reason: Some("DeadlineExceeded".to_string()),
                message: Some("Job was active longer than specified deadline".to_string()),
                last_transition_time: Some(Time(finished)),
                ..Default::default()
            }]),
            ..Default::default()
        });
        job
    }

    const SECRET_NAME: &str = "my-app-my-space-registry-secret-task-123-x7k2p";

    fn with_pull_secret(mut job: Job, name: &str) -> Job {
        if let Some(pod) = job.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
            pod.image_pull_secrets
                .get_or_insert_with(Vec::new)
                .push(LocalObjectReference {
                    name: name.to_string(),
                });
        }
        job
    }

    fn reported(mut job: Job) -> Job {
        job.metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert(LABEL_TASK_COMPLETED.to_string(), TASK_COMPLETED_TRUE.to_string());
        job
    }

    fn reconciler(
        jobs: MockJobClient,
        secrets: MockSecretsClient,
    ) -> (CompletionReconciler, mpsc::Receiver<TaskCompletion>) {
        let jobs: Arc<dyn JobClient> = Arc::new(jobs);
        let deleter = Arc::new(Deleter::new(jobs.clone(), Arc::new(secrets)));
        let (tx, rx) = mpsc::channel(4);
        (CompletionReconciler::new(jobs, deleter, tx, TTL), rx)
    }

    #[tokio::test]
    async fn story_finished_task_is_reported_once_and_labelled() {
        let mut jobs = MockJobClient::new();
        jobs.expect_set_label()
            .withf(|_, key, value| key == LABEL_TASK_COMPLETED && value == TASK_COMPLETED_TRUE)
            .times(1)
            .returning(|job, _, _| Ok(reported(job.clone())));
        let (reconciler, mut rx) = reconciler(jobs, MockSecretsClient::new());

        reconciler.reconcile(&succeeded(Utc::now())).await.unwrap();

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.guid, GUID);
        assert_eq!(completion.callback_url, "http://cc/tasks/task-123/completed");
        assert!(!completion.failed);
        assert!(completion.failure_reason.is_empty());
    }

    #[tokio::test]
    async fn failed_task_carries_the_condition_message() {
        let mut jobs = MockJobClient::new();
        jobs.expect_set_label().returning(|job, _, _| Ok(job.clone()));
        let (reconciler, mut rx) = reconciler(jobs, MockSecretsClient::new());

        reconciler.reconcile(&failed(Utc::now())).await.unwrap();

        let completion = rx.try_recv().unwrap();
        assert!(completion.failed);
        assert_eq!(
            completion.failure_reason,
            "Job was active longer than specified deadline"
        );
    }

    #[tokio::test]
    async fn running_task_is_left_alone() {
        let mut jobs = MockJobClient::new();
        jobs.expect_set_label().never();
        jobs.expect_delete().never();
        let (reconciler, mut rx) = reconciler(jobs, MockSecretsClient::new());

        reconciler.reconcile(&stored(None)).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reported_task_within_ttl_is_kept() {
        let mut jobs = MockJobClient::new();
        jobs.expect_set_label().never();
        jobs.expect_delete().never();
        let (reconciler, mut rx) = reconciler(jobs, MockSecretsClient::new());

        reconciler
            .reconcile(&reported(succeeded(Utc::now())))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn story_expired_task_is_deleted() {
        let job = reported(succeeded(Utc::now() - chrono::Duration::seconds(600)));
        let name = job.metadata.name.clone().unwrap();

        let mut jobs = MockJobClient::new();
        jobs.expect_delete()
            .withf(move |ns, n| ns == NAMESPACE && n == name)
            .times(1)
            .returning(|_, _| Ok(()));
        let (reconciler, mut rx) = reconciler(jobs, MockSecretsClient::new());

        reconciler.reconcile(&job).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn expired_task_already_gone_is_fine() {
        let mut jobs = MockJobClient::new();
        jobs.expect_delete()
            .returning(|_, name| Err(Error::not_found("Job", name)));
        let (reconciler, _rx) = reconciler(jobs, MockSecretsClient::new());

        let job = reported(failed(Utc::now() - chrono::Duration::seconds(600)));
        reconciler.reconcile(&job).await.unwrap();
    }

    #[tokio::test]
    async fn expired_task_with_missing_secret_is_still_deleted() {
        let finished = Utc::now() - chrono::Duration::seconds(600);
        let job = with_pull_secret(reported(succeeded(finished)), SECRET_NAME);

        let mut jobs = MockJobClient::new();
        jobs.expect_delete().times(1).returning(|_, _| Ok(()));
        let mut secrets = MockSecretsClient::new();
        secrets
            .expect_delete()
            .times(1)
            .returning(|_, name| Err(Error::not_found("Secret", name)));
        let (reconciler, _rx) = reconciler(jobs, secrets);

        reconciler.reconcile(&job).await.unwrap();
    }

    #[tokio::test]
    async fn closed_channel_is_reported() {
        let mut jobs = MockJobClient::new();
        jobs.expect_set_label().never();
        let (reconciler, rx) = reconciler(jobs, MockSecretsClient::new());
        drop(rx);

        let err = reconciler.reconcile(&succeeded(Utc::now())).await.unwrap_err();
        assert!(matches!(err, Error::ChannelClosed(_)));
    }

    #[tokio::test]
    async fn run_reports_jobs_from_the_watch_stream() {
        let mut jobs = MockJobClient::new();
        jobs.expect_set_label().times(1).returning(|job, _, _| Ok(job.clone()));
        jobs.expect_list().returning(|_| Ok(vec![]));
        let (reconciler, mut rx) = reconciler(jobs, MockSecretsClient::new());

        let events = stream::iter(vec![
            Ok::<_, watcher::Error>(Event::Init),
            Ok(Event::InitApply(stored(None))),
            Ok(Event::InitDone),
            Ok(Event::Apply(succeeded(Utc::now()))),
        ]);
        reconciler.run(events, Duration::from_secs(3600)).await;

        let completion = rx.try_recv().unwrap();
        assert_eq!(completion.guid, GUID);
        assert!(rx.try_recv().is_err());
    }
}
