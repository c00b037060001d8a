use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use stratus_common::clients::{PodClient, WorkloadClient};
use stratus_common::model::{RouteMessage, RouteSet};
use stratus_common::watch::ObjectEvent;
use stratus_common::{Result, ANNOTATION_REGISTERED_ROUTES, ANNOTATION_UNREGISTERED_ROUTES};
use tracing::{debug, error, instrument, warn};

use crate::diff::{group_by_port, unregistered, PortGroup};
use crate::pod::{
    annotation_routes, identifier, is_marked_for_deletion, is_ready, route_message,
    statefulset_owner,
};

/// Edge-triggered route messages from StatefulSet and pod changes
pub struct RouteChangeHandler {
    pods: Arc<dyn PodClient>,
    workloads: Arc<dyn WorkloadClient>,
}

impl RouteChangeHandler {
    /// Create a handler
    pub fn new(pods: Arc<dyn PodClient>, workloads: Arc<dyn WorkloadClient>) -> Self {
        Self { pods, workloads }
    }

    /// Messages caused by a StatefulSet change
    ///
    /// Updates re-register the new routes and unregister removed ones on every
    /// serving pod. Deletion unregisters everything the StatefulSet had.
    #[instrument(skip(self, event))]
    pub async fn handle_statefulset(
        &self,
        event: ObjectEvent<StatefulSet>,
    ) -> Result<Vec<RouteMessage>> {
        match event {
            ObjectEvent::Updated { old, new } => self.on_statefulset_update(&old, &new).await,
            ObjectEvent::Deleted(statefulset) => self.on_statefulset_delete(&statefulset).await,
            ObjectEvent::Added(_) => Ok(Vec::new()),
        }
    }

    /// Messages caused by a pod change
    ///
    /// A pod turning ready registers its owner's routes; a pod losing
    /// readiness or starting to terminate unregisters them.
    #[instrument(skip(self, event))]
    pub async fn handle_pod(&self, event: ObjectEvent<Pod>) -> Result<Vec<RouteMessage>> {
        let ObjectEvent::Updated { old, new } = event else {
            return Ok(Vec::new());
        };

        let was_serving = is_ready(&old) && !is_marked_for_deletion(&old);
        let is_serving = is_ready(&new) && !is_marked_for_deletion(&new);
        if was_serving == is_serving {
            return Ok(Vec::new());
        }

        let Some(routes) = self.owner_routes(&new).await? else {
            return Ok(Vec::new());
        };
        let grouped = if is_serving {
            group_by_port(&routes, &RouteSet::new())
        } else {
            group_by_port(&RouteSet::new(), &routes)
        };
        Ok(messages_for(&new, &grouped))
    }

    async fn on_statefulset_update(
        &self,
        old: &StatefulSet,
        new: &StatefulSet,
    ) -> Result<Vec<RouteMessage>> {
        if old.annotations() == new.annotations() {
            return Ok(Vec::new());
        }
        let name = new.name_any();

        let registered = match annotation_routes(new, ANNOTATION_REGISTERED_ROUTES) {
            Ok(routes) => routes,
            Err(e) => {
                error!(statefulset = %name, error = %e, "failed to decode updated routes");
                return Ok(Vec::new());
            }
        };
        let previous = annotation_routes(old, ANNOTATION_REGISTERED_ROUTES).unwrap_or_else(|e| {
            warn!(statefulset = %name, error = %e, "failed to decode previous routes");
            RouteSet::new()
        });
        let recorded = annotation_routes(new, ANNOTATION_UNREGISTERED_ROUTES).unwrap_or_else(|e| {
            warn!(statefulset = %name, error = %e, "failed to decode unregistered routes");
            RouteSet::new()
        });

        let mut removed = unregistered(&previous, &registered);
        removed.extend(unregistered(&recorded, &registered));
        let grouped = group_by_port(&registered, &removed);

        let pods = self.pods_of(new).await?;
        Ok(pods
            .iter()
            .filter(|pod| {
                let serving = is_ready(pod) && !is_marked_for_deletion(pod);
                if !serving {
                    debug!(pod = %pod.name_any(), "skipping pod that is not serving");
                }
                serving
            })
            .flat_map(|pod| messages_for(pod, &grouped))
            .collect())
    }

    async fn on_statefulset_delete(&self, statefulset: &StatefulSet) -> Result<Vec<RouteMessage>> {
        let routes = match annotation_routes(statefulset, ANNOTATION_REGISTERED_ROUTES) {
            Ok(routes) => routes,
            Err(e) => {
                error!(
                    statefulset = %statefulset.name_any(),
                    error = %e,
                    "failed to decode routes"
                );
                return Ok(Vec::new());
            }
        };
        let grouped = group_by_port(&RouteSet::new(), &routes);

        let pods = self.pods_of(statefulset).await?;
        Ok(pods.iter().flat_map(|pod| messages_for(pod, &grouped)).collect())
    }

    async fn pods_of(&self, statefulset: &StatefulSet) -> Result<Vec<Pod>> {
        let Some(id) = identifier(statefulset) else {
            debug!(statefulset = %statefulset.name_any(), "statefulset has no identity labels");
            return Ok(Vec::new());
        };
        self.pods.get_by_identifier(&id).await
    }

    /// Registered routes of the StatefulSet owning `pod`
    async fn owner_routes(&self, pod: &Pod) -> Result<Option<RouteSet>> {
        let pod_name = pod.name_any();
        let (Some(owner), Some(id)) = (statefulset_owner(pod), identifier(pod)) else {
            debug!(pod = %pod_name, "pod is not part of an application");
            return Ok(None);
        };

        let statefulsets = self.workloads.get_by_identifier(&id).await?;
        let Some(statefulset) = statefulsets.iter().find(|s| s.name_any() == owner) else {
            debug!(pod = %pod_name, owner, "owner statefulset not found");
            return Ok(None);
        };

        match annotation_routes(statefulset, ANNOTATION_REGISTERED_ROUTES) {
            Ok(routes) => Ok(Some(routes)),
            Err(e) => {
                debug!(pod = %pod_name, error = %e, "failed to decode owner routes");
                Ok(None)
            }
        }
    }
}

fn messages_for(pod: &Pod, grouped: &PortGroup) -> Vec<RouteMessage> {
    grouped
        .iter()
        .filter_map(|(port, routes)| {
            let message = route_message(pod, *port, routes.clone());
            if message.is_none() {
                debug!(pod = %pod.name_any(), port, "cannot build route message");
            }
            message
        })
        .collect()
}
