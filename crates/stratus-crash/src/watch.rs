use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::runtime::watcher::{self, Event};
use kube::ResourceExt;
use stratus_common::clients::EventsClient;
use stratus_common::model::CrashReport;
use stratus_common::watch::{ObjectEvent, WatchCache};
use stratus_common::Result;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::generate;

/// Feeds pod changes through the crash generator
pub struct CrashWatcher {
    events: Arc<dyn EventsClient>,
}

impl CrashWatcher {
    /// Create a watcher
    pub fn new(events: Arc<dyn EventsClient>) -> Self {
        Self { events }
    }

    /// Crash report for a pod change, if it is one
    ///
    /// Updates that leave the container statuses untouched are not looked at
    /// again, so a resync does not report the same crash twice.
    #[instrument(skip(self, change))]
    pub async fn on_change(&self, change: &ObjectEvent<Pod>) -> Result<Option<CrashReport>> {
        let pod = match change {
            ObjectEvent::Added(pod) => pod,
            ObjectEvent::Updated { old, new } => {
                if container_statuses(old) == container_statuses(new) {
                    return Ok(None);
                }
                new
            }
            ObjectEvent::Deleted(_) => return Ok(None),
        };
        if !pod.owner_references().iter().any(|o| o.kind == "StatefulSet") {
            return Ok(None);
        }

        let events = self.events.get_by_pod(pod).await?;
        Ok(generate(pod, &events))
    }

    /// Report crashes from a pod watch stream until it ends or `tx` closes
    pub async fn run<S>(&self, pods: S, tx: mpsc::Sender<CrashReport>)
    where
        S: Stream<Item = std::result::Result<Event<Pod>, watcher::Error>>,
    {
        let mut pods = std::pin::pin!(pods);
        let mut cache = WatchCache::<Pod>::new();

        info!("crash watcher started");

        while let Some(event) = pods.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "pod watch error");
                    continue;
                }
            };
            for change in cache.apply(event) {
                let report = match self.on_change(&change).await {
                    Ok(Some(report)) => report,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "failed to inspect pod");
                        continue;
                    }
                };
                info!(
                    instance = %report.instance,
                    reason = %report.reason,
                    exit_status = report.exit_status,
                    "instance crashed"
                );
                if tx.send(report).await.is_err() {
                    info!("crash report channel closed, crash watcher stopped");
                    return;
                }
            }
        }

        info!("crash watcher stopped");
    }
}

fn container_statuses(pod: &Pod) -> Option<&Vec<ContainerStatus>> {
    pod.status.as_ref()?.container_statuses.as_ref()
}
