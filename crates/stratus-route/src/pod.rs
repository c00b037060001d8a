//! Pod and StatefulSet accessors shared by the collector and the change handler

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use stratus_common::model::{decode_routes, LrpIdentifier, RouteMessage, RouteSet, Routes};
use stratus_common::{LABEL_GUID, LABEL_VERSION};

/// True when the pod carries `Ready=True`
pub(crate) fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

pub(crate) fn is_marked_for_deletion(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Name of the StatefulSet owning the pod, if any
pub(crate) fn statefulset_owner(pod: &Pod) -> Option<&str> {
    pod.owner_references()
        .iter()
        .find(|o| o.kind == "StatefulSet")
        .map(|o| o.name.as_str())
}

/// Identity labels of a pod or StatefulSet
pub(crate) fn identifier<K: Resource>(obj: &K) -> Option<LrpIdentifier> {
    let labels = obj.labels();
    Some(LrpIdentifier::new(
        labels.get(LABEL_GUID)?.clone(),
        labels.get(LABEL_VERSION)?.clone(),
    ))
}

/// Decode a route-list annotation; a missing annotation is the empty set
pub(crate) fn annotation_routes(
    statefulset: &StatefulSet,
    key: &str,
) -> Result<RouteSet, serde_json::Error> {
    statefulset
        .annotations()
        .get(key)
        .map_or_else(|| Ok(RouteSet::new()), |raw| decode_routes(raw))
}

/// Message for one pod and port, `None` when the pod has no IP yet
pub(crate) fn route_message(pod: &Pod, port: i32, routes: Routes) -> Option<RouteMessage> {
    let address = pod.status.as_ref()?.pod_ip.clone().filter(|ip| !ip.is_empty())?;
    let port = u32::try_from(port).ok()?;
    Some(RouteMessage {
        instance_id: pod.name_any(),
        name: pod.labels().get(LABEL_GUID).cloned().unwrap_or_default(),
        address,
        port,
        tls_port: 0,
        routes,
    })
}
