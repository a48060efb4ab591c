//! Disposable `mysqld` instances for tests.
//!
//! An [`Instance`] owns one engine process and its data directory. Starting
//! it materialises the data directory (from a template when one is
//! configured), writes the option file, picks a port and launches the engine,
//! retrying on a new port when the engine cannot listen or a foreign instance
//! answers. Once running, a watchdog thread relaunches the engine if it dies;
//! stopping asks the engine to shut down before killing it.
//!
//! The crate never speaks the engine's wire protocol. Callers supply a
//! [`Connector`] backed by their client library of choice, and the supervisor
//! uses it for readiness probes, identity bookkeeping and shutdown.
//!
//! ```text
//! Idle -> Initializing -> Launching -> ProbingConnectivity -> Reconciling -> Running
//!                            ^  |                |                 |
//!                            |  +-- PortConflict / FatalInitFailure +--> Failed
//!                            +--------- watchdog relaunch <---------- Running
//! Running -> Stopping -> Stopped
//! ```

pub mod engine;
mod errors;
pub mod identity;
pub mod port;
pub mod session;
mod supervisor;
pub mod telemetry;

#[cfg(test)]
mod tests;

pub use errors::{Diagnostics, SupervisorError};
pub use fixturedb_config::{ConfigWriter, EnvOverrides, LogFormat, Options, PortRange, Settings};
pub use identity::{InstanceIdentity, Reconciliation};
pub use port::PortAllocator;
pub use session::{ConnectTarget, Connector, Session, SessionError};
pub use supervisor::{
    Instance, InstanceBuilder, InstancePaths, InstanceRecord, InstanceState, Timings,
    pid_is_alive,
};
