use std::collections::BTreeMap;

use stratus_common::model::{RouteSet, Routes};

/// Registered and unregistered hostnames per container port
pub type PortGroup = BTreeMap<i32, Routes>;

/// Routes present in `old` but no longer in `new`
pub fn unregistered(old: &RouteSet, new: &RouteSet) -> RouteSet {
    old.difference(new).cloned().collect()
}

/// Group hostnames by the port they target
pub fn group_by_port(registered: &RouteSet, unregistered: &RouteSet) -> PortGroup {
    let mut group = PortGroup::new();
    for route in registered {
        group
            .entry(route.port)
            .or_default()
            .registered_routes
            .push(route.hostname.clone());
    }
    for route in unregistered {
        group
            .entry(route.port)
            .or_default()
            .unregistered_routes
            .push(route.hostname.clone());
    }
    group
}
