use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use stratus_common::clients::{PodClient, WorkloadClient};
use stratus_common::model::{RouteMessage, Routes, SourceType};
use stratus_common::{Result, ANNOTATION_REGISTERED_ROUTES};
use tracing::{debug, instrument};

use crate::pod::{annotation_routes, is_ready, route_message, statefulset_owner};

/// Level-triggered view of every route that should currently be registered
pub struct Collector {
    pods: Arc<dyn PodClient>,
    workloads: Arc<dyn WorkloadClient>,
}

impl Collector {
    /// Create a collector
    pub fn new(pods: Arc<dyn PodClient>, workloads: Arc<dyn WorkloadClient>) -> Self {
        Self { pods, workloads }
    }

    /// One registration message per route of every ready application pod
    ///
    /// Pods that cannot be attributed to a StatefulSet with readable routes
    /// are skipped.
    #[instrument(skip(self))]
    pub async fn collect(&self) -> Result<Vec<RouteMessage>> {
        let pods = self.pods.get_all().await?;
        let statefulsets = self.workloads.get_by_source_type(SourceType::App).await?;

        let owners: BTreeMap<(String, String), &StatefulSet> = statefulsets
            .iter()
            .map(|sts| ((sts.namespace().unwrap_or_default(), sts.name_any()), sts))
            .collect();

        let mut messages = Vec::new();
        for pod in pods.iter().filter(|p| is_ready(p)) {
            let pod_name = pod.name_any();
            let Some(owner) = statefulset_owner(pod) else {
                debug!(pod = %pod_name, "pod has no statefulset owner");
                continue;
            };
            let Some(statefulset) =
                owners.get(&(pod.namespace().unwrap_or_default(), owner.to_string()))
            else {
                debug!(pod = %pod_name, owner, "owner statefulset not found");
                continue;
            };
            if !statefulset.annotations().contains_key(ANNOTATION_REGISTERED_ROUTES) {
                debug!(pod = %pod_name, "owner has no routes annotation");
                continue;
            }
            let routes = match annotation_routes(statefulset, ANNOTATION_REGISTERED_ROUTES) {
                Ok(routes) => routes,
                Err(e) => {
                    debug!(pod = %pod_name, error = %e, "failed to decode routes");
                    continue;
                }
            };

            for route in routes {
                let routes = Routes {
                    registered_routes: vec![route.hostname],
                    unregistered_routes: Vec::new(),
                };
                match route_message(pod, route.port, routes) {
                    Some(message) => messages.push(message),
                    None => debug!(pod = %pod_name, "cannot build route message"),
                }
            }
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_common::clients::{MockPodClient, MockWorkloadClient};
    use stratus_common::model::Route;
    use stratus_common::Error;

    use crate::fixtures::{pod, statefulset, STS};

    fn collector(
        pods: Vec<k8s_openapi::api::core::v1::Pod>,
        statefulsets: Vec<StatefulSet>,
    ) -> Collector {
        let mut pod_client = MockPodClient::new();
        pod_client
            .expect_get_all()
            .times(1)
            .returning(move || Ok(pods.clone()));
        let mut workloads = MockWorkloadClient::new();
        workloads
            .expect_get_by_source_type()
            .withf(|source_type| *source_type == SourceType::App)
            .times(1)
            .returning(move |_| Ok(statefulsets.clone()));
        Collector::new(Arc::new(pod_client), Arc::new(workloads))
    }

    #[tokio::test]
    async fn story_one_message_per_route() {
        let sts = statefulset(
            &[Route::new("a.example.com", 8080), Route::new("b.example.com", 9090)],
            None,
        );
        let messages = collector(vec![pod(0, true)], vec![sts])
            .collect()
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].instance_id, format!("{STS}-0"));
        assert_eq!(messages[0].name, "abc");
        assert_eq!(messages[0].address, "10.0.0.1");
        assert_eq!(messages[0].port, 8080);
        assert_eq!(messages[0].routes.registered_routes, vec!["a.example.com"]);
        assert_eq!(messages[1].port, 9090);
        assert_eq!(messages[1].routes.registered_routes, vec!["b.example.com"]);
    }

    #[tokio::test]
    async fn unready_pods_are_skipped() {
        let sts = statefulset(&[Route::new("a.example.com", 8080)], None);
        let messages = collector(vec![pod(0, false), pod(1, true)], vec![sts])
            .collect()
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].instance_id, format!("{STS}-1"));
    }

    #[tokio::test]
    async fn empty_lists_produce_nothing() {
        assert!(collector(vec![], vec![]).collect().await.unwrap().is_empty());
        assert!(collector(vec![pod(0, true)], vec![])
            .collect()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unowned_pod_is_skipped() {
        let mut orphan = pod(0, true);
        orphan.metadata.owner_references = None;
        let sts = statefulset(&[Route::new("a.example.com", 8080)], None);
        assert!(collector(vec![orphan], vec![sts])
            .collect()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn malformed_routes_skip_only_that_pod() {
        let mut broken = statefulset(&[], None);
        broken.metadata.name = Some("broken".to_string());
        broken
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(ANNOTATION_REGISTERED_ROUTES.to_string(), "{not json".to_string());
        let mut broken_pod = pod(0, true);
        if let Some(owners) = broken_pod.metadata.owner_references.as_mut() {
            owners[0].name = "broken".to_string();
        }

        let sts = statefulset(&[Route::new("a.example.com", 8080)], None);
        let messages = collector(vec![broken_pod, pod(1, true)], vec![broken, sts])
            .collect()
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn emptied_routes_emit_nothing() {
        let sts = statefulset(&[], Some(&[Route::new("foo.example.com", 8080)]));
        assert!(collector(vec![pod(0, true)], vec![sts])
            .collect()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_failure_is_returned() {
        let mut pods = MockPodClient::new();
        pods.expect_get_all()
            .returning(|| Err(Error::validation("api down")));
        let collector = Collector::new(Arc::new(pods), Arc::new(MockWorkloadClient::new()));
        assert!(collector.collect().await.is_err());
    }
}
