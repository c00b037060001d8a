//! Desire options: mutations applied to a built object before submission
//!
//! The desirers know nothing about owner references or extra labels; callers
//! pass a list of options and they run in order on the converted object.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use stratus_common::Result;

/// A mutation applied to a workload object before it is created
pub type DesireOption<K> = Box<dyn Fn(&mut K) -> Result<()> + Send + Sync>;

/// Run every option against `obj`, stopping at the first failure
pub fn apply_options<K>(obj: &mut K, options: &[DesireOption<K>]) -> Result<()> {
    for option in options {
        option(obj)?;
    }
    Ok(())
}

/// Append `owner` to the object's owner references
pub fn with_owner_reference<K: Resource>(owner: OwnerReference) -> DesireOption<K> {
    Box::new(move |obj: &mut K| {
        obj.meta_mut()
            .owner_references
            .get_or_insert_with(Vec::new)
            .push(owner.clone());
        Ok(())
    })
}

/// Merge `labels` into the object's labels
pub fn with_labels<K: Resource>(labels: BTreeMap<String, String>) -> DesireOption<K> {
    Box::new(move |obj: &mut K| {
        obj.meta_mut()
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
        Ok(())
    })
}
