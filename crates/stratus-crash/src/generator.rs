use k8s_openapi::api::core::v1::{ContainerStateTerminated, ContainerStatus, Event, Pod};
use kube::ResourceExt;
use stratus_common::model::CrashReport;
use stratus_common::naming::instance_index;
use stratus_common::{ANNOTATION_PROCESS_GUID, LABEL_GUID, LABEL_VERSION};
use tracing::{debug, error};

use crate::{
    REASON_CRASH_LOOP_BACK_OFF, REASON_CREATE_CONTAINER_CONFIG_ERROR, REASON_ERROR,
    REASON_KILLING,
};

/// Crash report for `pod` given its events, oldest first
///
/// Only the last event matters: `Error` or `CrashLoopBackOff` produce a report
/// with the most recent exit of the failing container, `Killing` means the
/// instance is being stopped and never counts as a crash. A container stuck in
/// `CreateContainerConfigError` is reported regardless of the event reason.
/// Calling this twice for the same state yields two identical reports.
pub fn generate(pod: &Pod, events: &[Event]) -> Option<CrashReport> {
    let last = events.last()?;
    let last_reason = last.reason.as_deref().unwrap_or_default();
    if last_reason == REASON_KILLING {
        debug!(pod = %pod.name_any(), "pod is being stopped");
        return None;
    }

    let name = pod.name_any();
    let Some(index) = instance_index(&name) else {
        error!(pod = %name, "failed to parse instance index");
        return None;
    };
    let statuses = container_statuses(pod);

    if let Some((status, message)) = statuses.iter().find_map(|s| {
        let waiting = s.state.as_ref()?.waiting.as_ref()?;
        (waiting.reason.as_deref() == Some(REASON_CREATE_CONTAINER_CONFIG_ERROR))
            .then(|| (*s, waiting.message.clone().unwrap_or_default()))
    }) {
        return Some(CrashReport {
            process_guid: process_guid(pod),
            instance: name,
            index,
            reason: REASON_CREATE_CONTAINER_CONFIG_ERROR.to_string(),
            exit_status: 0,
            exit_description: message,
            crash_count: status.restart_count,
            crash_timestamp: 0,
        });
    }

    if last_reason != REASON_ERROR && last_reason != REASON_CRASH_LOOP_BACK_OFF {
        return None;
    }

    let (status, terminated) = statuses.iter().find_map(|s| Some((*s, last_exit(s)?)))?;
    Some(CrashReport {
        process_guid: process_guid(pod),
        instance: name,
        index,
        reason: last_reason.to_string(),
        exit_status: terminated.exit_code,
        exit_description: terminated
            .reason
            .clone()
            .or_else(|| terminated.message.clone())
            .unwrap_or_default(),
        crash_count: status.restart_count,
        crash_timestamp: terminated
            .started_at
            .as_ref()
            .map_or(0, |t| t.0.timestamp()),
    })
}

fn container_statuses(pod: &Pod) -> Vec<&ContainerStatus> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .collect()
}

/// Current termination if the container exited non-zero, else the previous one
fn last_exit(status: &ContainerStatus) -> Option<&ContainerStateTerminated> {
    let current = status
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .filter(|t| t.exit_code != 0);
    current.or_else(|| status.last_state.as_ref()?.terminated.as_ref())
}

fn process_guid(pod: &Pod) -> String {
    if let Some(guid) = pod.annotations().get(ANNOTATION_PROCESS_GUID) {
        return guid.clone();
    }
    let labels = pod.labels();
    match (labels.get(LABEL_GUID), labels.get(LABEL_VERSION)) {
        (Some(guid), Some(version)) => format!("{guid}-{version}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use k8s_openapi::chrono::{TimeZone, Utc};

    fn event(reason: &str) -> Event {
        Event {
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    fn pod(name: &str, status: ContainerStatus) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                annotations: Some(BTreeMap::from([(
                    ANNOTATION_PROCESS_GUID.to_string(),
                    "abc-1".to_string(),
                )])),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![status]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn crash_looping(exit_code: i32) -> ContainerStatus {
        ContainerStatus {
            name: "opi".to_string(),
            restart_count: 3,
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(REASON_CRASH_LOOP_BACK_OFF.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            last_state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    reason: Some("Error".to_string()),
                    started_at: Some(Time(Utc.timestamp_opt(1_700_000_000, 0).unwrap())),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn story_crash_loop_is_reported() {
        let report = generate(
            &pod("my-app-dev-0123456789-2", crash_looping(1)),
            &[event("Scheduled"), event("Started"), event(REASON_CRASH_LOOP_BACK_OFF)],
        )
        .unwrap();

        assert_eq!(report.process_guid, "abc-1");
        assert_eq!(report.instance, "my-app-dev-0123456789-2");
        assert_eq!(report.index, 2);
        assert_eq!(report.reason, "CrashLoopBackOff");
        assert_eq!(report.exit_status, 1);
        assert_eq!(report.exit_description, "Error");
        assert_eq!(report.crash_count, 3);
        assert_eq!(report.crash_timestamp, 1_700_000_000);
    }

    #[test]
    fn no_events_no_report() {
        assert_eq!(generate(&pod("app-0", crash_looping(1)), &[]), None);
    }

    #[test]
    fn stopping_pod_is_not_a_crash() {
        let events = [event(REASON_CRASH_LOOP_BACK_OFF), event(REASON_KILLING)];
        assert_eq!(generate(&pod("app-0", crash_looping(1)), &events), None);
    }

    #[test]
    fn only_the_last_event_counts() {
        let events = [event(REASON_ERROR), event("Started")];
        assert_eq!(generate(&pod("app-0", crash_looping(1)), &events), None);
    }

    #[test]
    fn terminated_container_reports_its_current_exit() {
        let status = ContainerStatus {
            restart_count: 0,
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code: 137,
                    reason: Some("OOMKilled".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = generate(&pod("app-0", status), &[event(REASON_ERROR)]).unwrap();
        assert_eq!(report.reason, "Error");
        assert_eq!(report.exit_status, 137);
        assert_eq!(report.exit_description, "OOMKilled");
        assert_eq!(report.crash_timestamp, 0);
    }

    #[test]
    fn misconfigured_container_is_reported() {
        let status = ContainerStatus {
            restart_count: 0,
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(REASON_CREATE_CONTAINER_CONFIG_ERROR.to_string()),
                    message: Some("secret \"db\" not found".to_string()),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let report = generate(&pod("app-0", status), &[event("Failed")]).unwrap();
        assert_eq!(report.reason, REASON_CREATE_CONTAINER_CONFIG_ERROR);
        assert_eq!(report.exit_status, 0);
        assert_eq!(report.exit_description, "secret \"db\" not found");
    }

    #[test]
    fn pod_without_index_is_skipped() {
        let events = [event(REASON_CRASH_LOOP_BACK_OFF)];
        assert_eq!(generate(&pod("no-index-here", crash_looping(1)), &events), None);
    }

    #[test]
    fn generator_does_not_deduplicate() {
        let p = pod("app-0", crash_looping(1));
        let events = [event(REASON_ERROR)];
        assert_eq!(generate(&p, &events), generate(&p, &events));
        assert!(generate(&p, &events).is_some());
    }
}
