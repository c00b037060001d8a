//! Route registration for application pods
//!
//! Desired routes live in the `registered-routes` annotation of each
//! StatefulSet. [`Collector`] periodically re-announces the routes of every
//! ready pod; [`RouteChangeHandler`] turns StatefulSet and pod changes into
//! explicit register and unregister messages.

#![deny(missing_docs)]

mod collector;
mod diff;
mod handler;
mod pod;
mod runner;

pub use collector::Collector;
pub use diff::{group_by_port, unregistered, PortGroup};
pub use handler::RouteChangeHandler;
pub use runner::{run_change_watcher, run_collector};
