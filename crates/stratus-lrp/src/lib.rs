//! Long-running process lifecycle over StatefulSets
//!
//! - [`Desirer`]: create the StatefulSet (and its private-registry secret)
//! - [`Updater`]: scale, re-image and re-route an existing StatefulSet
//! - [`Stopper`]: delete a StatefulSet or a single instance
//!
//! LRPs with more than one instance are guarded by a PodDisruptionBudget named
//! after their StatefulSet; desire, update and stop keep it in step.
//! - [`Getter`]: read LRPs and their instances back
//!
//! Every operation re-reads the StatefulSet before mutating it; the API
//! server's resourceVersion check is the only concurrency guard.

#![deny(missing_docs)]

mod desire;
mod get;
mod stop;
mod update;

pub use desire::Desirer;
pub use get::{pod_state, Getter};
pub use stop::Stopper;
pub use update::Updater;

use k8s_openapi::api::apps::v1::StatefulSet;
use stratus_common::clients::{PodDisruptionBudgetClient, WorkloadClient};
use stratus_common::model::{Lrp, LrpIdentifier};
use stratus_common::{Error, Result};
use stratus_workload::{needs_disruption_budget, pod_disruption_budget};
use tracing::debug;

/// Fetch the single StatefulSet carrying `id`'s labels
pub(crate) async fn get_statefulset(
    workloads: &dyn WorkloadClient,
    id: &LrpIdentifier,
) -> Result<StatefulSet> {
    let mut found = workloads.get_by_identifier(id).await?;
    match found.len() {
        0 => Err(Error::not_found("StatefulSet", id.to_string())),
        1 => Ok(found.remove(0)),
        _ => Err(Error::MultipleWorkloads {
            kind: "StatefulSet".to_string(),
            guid: id.to_string(),
        }),
    }
}

/// Create or delete the budget for `statefulset_name` to match `lrp`'s instances
pub(crate) async fn sync_disruption_budget(
    budgets: &dyn PodDisruptionBudgetClient,
    namespace: &str,
    statefulset_name: &str,
    lrp: &Lrp,
) -> Result<()> {
    if needs_disruption_budget(lrp) {
        let budget = pod_disruption_budget(statefulset_name, lrp);
        match budgets.create(namespace, &budget).await {
            Ok(_) => debug!(budget = %statefulset_name, "created pod disruption budget"),
            Err(Error::AlreadyExists { .. }) => {
                debug!(budget = %statefulset_name, "pod disruption budget already exists")
            }
            Err(e) => return Err(e),
        }
    } else {
        delete_disruption_budget(budgets, namespace, statefulset_name).await?;
    }
    Ok(())
}

/// Delete the budget for `statefulset_name`; a missing one is not an error
pub(crate) async fn delete_disruption_budget(
    budgets: &dyn PodDisruptionBudgetClient,
    namespace: &str,
    statefulset_name: &str,
) -> Result<()> {
    match budgets.delete(namespace, statefulset_name).await {
        Err(e) if e.is_not_found() => {
            debug!(budget = %statefulset_name, "no pod disruption budget to delete");
            Ok(())
        }
        other => other,
    }
}
