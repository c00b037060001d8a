//! PodDisruptionBudgets for multi-instance LRPs

use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use stratus_common::model::Lrp;

use crate::stateful_set::selector_labels;

/// Instances that must stay up during voluntary disruptions
pub const MIN_AVAILABLE_INSTANCES: i32 = 1;

/// Whether `lrp` runs enough instances to be guarded by a budget
pub fn needs_disruption_budget(lrp: &Lrp) -> bool {
    lrp.target_instances > 1
}

/// Budget named after the StatefulSet, selecting the same pods it does
pub fn pod_disruption_budget(statefulset_name: &str, lrp: &Lrp) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(statefulset_name.to_string()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            min_available: Some(IntOrString::Int(MIN_AVAILABLE_INSTANCES)),
            selector: Some(LabelSelector {
                match_labels: Some(selector_labels(&lrp.id)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
