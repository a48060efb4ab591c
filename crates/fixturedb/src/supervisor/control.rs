//! State shared by the foreground API and the watchdog, always accessed under
//! the per-instance lock.

use std::sync::Arc;
use std::time::Instant;

use fixturedb_config::{ConfigWriter, Settings};
use tracing::{debug, warn};

use super::instance::Timings;
use super::paths::InstancePaths;
use super::process::ServerProcess;
use super::state::{InstanceRecord, InstanceState};
use super::{SUPERVISOR_TARGET, files};
use crate::engine::statements::ROOT_USER;
use crate::engine::{LaunchPlan, PortConflictSignatures};
use crate::errors::{Diagnostics, SupervisorError};
use crate::identity::InstanceIdentity;
use crate::port::PortAllocator;
use crate::session::{ConnectTarget, Connector, Session};

const LOOPBACK: &str = "127.0.0.1";

pub(super) struct Core {
    pub(super) settings: Settings,
    pub(super) paths: InstancePaths,
    pub(super) identity: InstanceIdentity,
    pub(super) plan: LaunchPlan,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) signatures: PortConflictSignatures,
    pub(super) allocator: PortAllocator,
    pub(super) writer: ConfigWriter,
    pub(super) creation_scripts: Vec<String>,
    pub(super) timings: Timings,
    pub(super) state: InstanceState,
    pub(super) process: Option<ServerProcess>,
    pub(super) port: Option<u16>,
    /// Retry offset handed to the port allocator; only ever grows.
    pub(super) port_attempt: u32,
    pub(super) start_attempts: u32,
    pub(super) port_conflict_retries: u32,
    pub(super) root_password_set: bool,
    pub(super) initialised: bool,
    pub(super) setup_done: bool,
    pub(super) started_at: Option<Instant>,
    pub(super) last_activity: Instant,
}

impl Core {
    pub(super) fn set_state(&mut self, state: InstanceState) {
        if self.state != state {
            debug!(
                target: SUPERVISOR_TARGET,
                identity = %self.identity,
                from = %self.state,
                to = %state,
                "state transition"
            );
        }
        self.state = state;
        self.write_record();
    }

    fn write_record(&self) {
        if !self.paths.root().is_dir() {
            return;
        }
        let record = InstanceRecord {
            state: self.state,
            pid: self.pid(),
            port: self.port,
            identity: self.identity.to_string(),
            data_dir: self.paths.data_dir().to_path_buf(),
            start_attempts: self.start_attempts,
            port_conflict_retries: self.port_conflict_retries,
            timestamp: InstanceRecord::stamp(),
        };
        if let Err(error) = record.write(&self.paths.record_file()) {
            warn!(
                target: SUPERVISOR_TARGET,
                error = %error,
                "failed to write instance record"
            );
        }
    }

    pub(super) fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ServerProcess::pid)
    }

    pub(super) fn process_alive(&mut self) -> bool {
        self.process.as_mut().is_some_and(ServerProcess::is_alive)
    }

    pub(super) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Names the timeout that has run out, if any.
    pub(super) fn expired(&self, now: Instant) -> Option<&'static str> {
        let options = &self.settings.options;
        if let (Some(lifetime), Some(started_at)) = (options.lifetime, self.started_at)
            && now.duration_since(started_at) >= lifetime
        {
            return Some("lifetime");
        }
        if let Some(idle) = options.inactivity_timeout
            && now.duration_since(self.last_activity) >= idle
        {
            return Some("inactivity");
        }
        None
    }

    pub(super) fn connect_target(&self, port: u16) -> ConnectTarget {
        ConnectTarget {
            host: self
                .settings
                .engine
                .bind_address
                .clone()
                .filter(|address| !matches!(address.as_str(), "0.0.0.0" | "::" | "*"))
                .unwrap_or_else(|| LOOPBACK.to_owned()),
            port,
            socket: self.settings.engine.socket.clone(),
            user: ROOT_USER.to_owned(),
            password: self
                .root_password_set
                .then(|| self.settings.options.root_password.clone()),
            schema: None,
        }
    }

    /// Opens a session as root against the running engine.
    pub(super) fn open_session(&self) -> Result<Box<dyn Session>, SupervisorError> {
        let port = self
            .port
            .filter(|_| self.process.is_some())
            .ok_or(SupervisorError::NotRunning { state: self.state })?;
        Ok(self.connector.connect(&self.connect_target(port))?)
    }

    /// Output the engine left behind: captured streams plus its error log.
    pub(super) fn diagnostics(&self) -> Diagnostics {
        let error_log = self
            .settings
            .engine
            .log_error
            .as_deref()
            .map(|name| files::read_tail(&self.paths.engine_log(name)))
            .unwrap_or_default();
        Diagnostics {
            stdout: files::read_tail(&self.paths.stdout_log()),
            stderr: files::read_tail(&self.paths.stderr_log()),
            error_log,
        }
    }

    /// Kills and forgets the tracked process. Used when a launch attempt is
    /// abandoned.
    pub(super) fn discard_process(&mut self) {
        if let Some(mut process) = self.process.take()
            && !process.terminate(self.timings.kill_timeout)
        {
            warn!(
                target: SUPERVISOR_TARGET,
                pid = process.pid(),
                "abandoned engine process did not exit"
            );
        }
    }
}
