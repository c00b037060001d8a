//! Workload conversion for stratus
//!
//! Turns the abstract [`Lrp`](stratus_common::model::Lrp) and
//! [`Task`](stratus_common::model::Task) values into the Kubernetes objects that
//! materialize them, and back again for read paths. Nothing in this crate
//! performs I/O; secret creation and submission belong to the desirers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let converter = LrpToStatefulSet::new(&config);
//! let mut statefulset = converter.convert(&lrp)?;
//! apply_options(&mut statefulset, &options)?;
//! ```

#![deny(missing_docs)]

pub mod converter;
pub mod disruption_budget;
pub mod env;
pub mod job;
pub mod options;
pub mod probes;
pub mod registry;
pub mod resources;
pub mod stateful_set;

pub use converter::{LrpConverter, TaskConverter};
pub use disruption_budget::{needs_disruption_budget, pod_disruption_budget};
pub use job::TaskToJob;
pub use options::{apply_options, with_labels, with_owner_reference, DesireOption};
pub use stateful_set::{private_registry_secret, statefulset_to_lrp, LrpToStatefulSet};
