//! Process supervision for one disposable engine instance.
//!
//! [`Instance`] is the public face. Internally a single `Core` value holds the
//! process handle, counters and state; it lives behind the per-instance lock
//! shared with the watchdog thread. The launch loop, shutdown sequencing,
//! snapshotting and initialisation are `Core` methods split across files.

mod control;
mod files;
mod initialise;
mod instance;
mod launch;
mod paths;
mod process;
mod shutdown;
mod snapshot;
mod state;
mod watchdog;

pub use instance::{Instance, InstanceBuilder, Timings};
pub use paths::InstancePaths;
pub use process::pid_is_alive;
pub use state::{InstanceRecord, InstanceState};

pub(crate) const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");
pub(crate) const WATCHDOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::watchdog");
pub(crate) const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");
