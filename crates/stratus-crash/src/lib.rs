//! Crash reports for application instances
//!
//! [`generate`] classifies one pod from its container statuses and the tail of
//! its event stream. [`CrashWatcher`] drives it from a pod watch and pushes
//! reports into a bounded channel.

#![deny(missing_docs)]

mod generator;
mod watch;

pub use generator::generate;
pub use watch::CrashWatcher;

/// Event reason of a container exiting with an error
pub const REASON_ERROR: &str = "Error";

/// Event reason of a container restarting in a loop
pub const REASON_CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";

/// Waiting reason of a container whose configuration cannot be resolved
pub const REASON_CREATE_CONTAINER_CONFIG_ERROR: &str = "CreateContainerConfigError";

/// Event reason of a pod being stopped on purpose
pub const REASON_KILLING: &str = "Killing";
