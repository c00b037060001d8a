use std::sync::Arc;

use k8s_openapi::api::core::v1::{Event, Pod};
use stratus_common::clients::{EventsClient, PodClient, WorkloadClient};
use stratus_common::model::{instance_state, Instance, Lrp, LrpIdentifier, SourceType};
use stratus_common::naming::instance_index;
use stratus_common::Result;
use stratus_workload::statefulset_to_lrp;
use tracing::{instrument, warn};

use crate::get_statefulset;

const EVENT_KILLING: &str = "Killing";
const EVENT_FAILED_SCHEDULING: &str = "FailedScheduling";
const EVENT_FAILED_SCALE_UP: &str = "NotTriggerScaleUp";
const INSUFFICIENT_MEMORY_MESSAGE: &str = "Insufficient memory";

/// Reads LRPs and their instances back from the cluster
pub struct Getter {
    workloads: Arc<dyn WorkloadClient>,
    pods: Arc<dyn PodClient>,
    events: Arc<dyn EventsClient>,
}

impl Getter {
    /// Create a getter
    pub fn new(
        workloads: Arc<dyn WorkloadClient>,
        pods: Arc<dyn PodClient>,
        events: Arc<dyn EventsClient>,
    ) -> Self {
        Self {
            workloads,
            pods,
            events,
        }
    }

    /// The LRP materialized for `id`
    #[instrument(skip(self), fields(guid = %id.guid, version = %id.version))]
    pub async fn get(&self, id: &LrpIdentifier) -> Result<Lrp> {
        let statefulset = get_statefulset(self.workloads.as_ref(), id).await?;
        statefulset_to_lrp(&statefulset)
    }

    /// Every application LRP; objects that cannot be read back are skipped
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<Lrp>> {
        let statefulsets = self.workloads.get_by_source_type(SourceType::App).await?;
        Ok(statefulsets
            .iter()
            .filter_map(|sts| match statefulset_to_lrp(sts) {
                Ok(lrp) => Some(lrp),
                Err(e) => {
                    warn!(
                        statefulset = sts.metadata.name.as_deref().unwrap_or_default(),
                        error = %e,
                        "skipping unconvertible statefulset"
                    );
                    None
                }
            })
            .collect())
    }

    /// Instances of the LRP, excluding ones being stopped
    #[instrument(skip(self), fields(guid = %id.guid, version = %id.version))]
    pub async fn get_instances(&self, id: &LrpIdentifier) -> Result<Vec<Instance>> {
        get_statefulset(self.workloads.as_ref(), id).await?;

        let pods = self.pods.get_by_identifier(id).await?;
        let mut instances = Vec::with_capacity(pods.len());

        for pod in pods {
            let pod_name = pod.metadata.name.clone().unwrap_or_default();
            let events = self.events.get_by_pod(&pod).await?;
            let last = events.last();

            if last.is_some_and(|e| reason(e) == EVENT_KILLING) {
                continue;
            }

            let Some(index) = instance_index(&pod_name) else {
                warn!(pod = %pod_name, "skipping pod without instance index");
                continue;
            };

            let since = pod
                .status
                .as_ref()
                .and_then(|s| s.start_time.as_ref())
                .and_then(|t| t.0.timestamp_nanos_opt())
                .unwrap_or(0);

            let (state, placement_error) = if last.is_some_and(is_insufficient_memory) {
                (instance_state::CRASHED, instance_state::INSUFFICIENT_MEMORY)
            } else {
                (pod_state(&pod), "")
            };

            instances.push(Instance {
                index,
                since,
                state: state.to_string(),
                placement_error: placement_error.to_string(),
            });
        }

        Ok(instances)
    }
}

fn reason(event: &Event) -> &str {
    event.reason.as_deref().unwrap_or_default()
}

fn is_insufficient_memory(event: &Event) -> bool {
    matches!(reason(event), EVENT_FAILED_SCHEDULING | EVENT_FAILED_SCALE_UP)
        && event
            .message
            .as_deref()
            .is_some_and(|m| m.contains(INSUFFICIENT_MEMORY_MESSAGE))
}

/// Instance state derived from pod phase and container statuses
pub fn pod_state(pod: &Pod) -> &'static str {
    let Some(status) = pod.status.as_ref() else {
        return instance_state::UNKNOWN;
    };
    let containers = status.container_statuses.as_deref().unwrap_or_default();

    let crashed = containers.iter().any(|c| {
        let waiting_on_crash = c
            .state
            .as_ref()
            .and_then(|s| s.waiting.as_ref())
            .and_then(|w| w.reason.as_deref())
            .is_some_and(|r| matches!(r, "CrashLoopBackOff" | "ErrImagePull" | "ImagePullBackOff"));
        let terminated = c.state.as_ref().is_some_and(|s| s.terminated.is_some());
        waiting_on_crash || terminated
    });

    match status.phase.as_deref() {
        Some("Pending") if crashed => instance_state::CRASHED,
        Some("Pending") => instance_state::CLAIMED,
        Some("Running") if crashed => instance_state::CRASHED,
        Some("Running") if !containers.is_empty() && containers.iter().all(|c| c.ready) => {
            instance_state::RUNNING
        }
        Some("Running") => instance_state::CLAIMED,
        Some("Failed") | Some("Succeeded") => instance_state::CRASHED,
        _ => instance_state::UNKNOWN,
    }
}
