//! The launch loop: config, port, spawn, probe, reconcile, and the retry
//! policy around them.

use std::fs;
use std::process::Stdio;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use super::control::Core;
use super::process::ServerProcess;
use super::state::InstanceState;
use super::{SUPERVISOR_TARGET, files};
use crate::engine::statements;
use crate::errors::{Diagnostics, SupervisorError};
use crate::identity::{self, Reconciliation};
use crate::session::Session;

/// Why a single launch attempt did not produce a running instance.
#[derive(Debug)]
pub(super) enum LaunchFailure {
    /// The engine could not own its port; retry on another one.
    PortConflict {
        port: u16,
        diagnostics: Diagnostics,
    },
    /// A differently identified instance answered; retry on another port.
    IdentityConflict { port: u16, found: String },
    /// The engine never became reachable; retry on another port.
    FatalInit {
        port: u16,
        reason: String,
        diagnostics: Diagnostics,
    },
    /// Not retried.
    Fatal(SupervisorError),
}

impl From<SupervisorError> for LaunchFailure {
    fn from(error: SupervisorError) -> Self {
        Self::Fatal(error)
    }
}

impl Core {
    /// Launches until the engine is running, retrying port conflicts and
    /// unreachable engines up to their separate ceilings.
    ///
    /// Once a ceiling is exceeded the last cause is returned.
    pub(super) fn launch_until_ready(&mut self) -> Result<(), SupervisorError> {
        let max_port_conflicts = self.settings.options.max_port_conflict_retries;
        let max_init_failures = self.settings.options.max_init_failure_retries;
        let mut port_conflicts = 0;
        let mut init_failures = 0;

        loop {
            self.start_attempts += 1;
            let failure = match self.launch_once() {
                Ok(()) => {
                    self.started_at.get_or_insert_with(Instant::now);
                    self.touch();
                    self.set_state(InstanceState::Running);
                    info!(
                        target: SUPERVISOR_TARGET,
                        identity = %self.identity,
                        pid = self.pid(),
                        port = self.port,
                        attempts = self.start_attempts,
                        "instance running"
                    );
                    return Ok(());
                }
                Err(failure) => failure,
            };

            let terminal = match failure {
                LaunchFailure::PortConflict { port, diagnostics } => {
                    port_conflicts += 1;
                    self.port_conflict_retries += 1;
                    self.set_state(InstanceState::PortConflict);
                    warn!(
                        target: SUPERVISOR_TARGET,
                        port,
                        attempt = port_conflicts,
                        "port conflict"
                    );
                    (port_conflicts > max_port_conflicts).then_some(
                        SupervisorError::PortConflict {
                            port,
                            attempts: port_conflicts,
                            diagnostics,
                        },
                    )
                }
                LaunchFailure::IdentityConflict { port, found } => {
                    port_conflicts += 1;
                    self.port_conflict_retries += 1;
                    self.set_state(InstanceState::PortConflict);
                    warn!(
                        target: SUPERVISOR_TARGET,
                        port,
                        found = %found,
                        attempt = port_conflicts,
                        "foreign instance owns the port"
                    );
                    (port_conflicts > max_port_conflicts).then(|| {
                        SupervisorError::IdentityConflict {
                            port,
                            expected: self.identity.to_string(),
                            found,
                        }
                    })
                }
                LaunchFailure::FatalInit {
                    port,
                    reason,
                    diagnostics,
                } => {
                    init_failures += 1;
                    self.set_state(InstanceState::FatalInitFailure);
                    warn!(
                        target: SUPERVISOR_TARGET,
                        port,
                        reason = %reason,
                        attempt = init_failures,
                        "engine failed to initialise"
                    );
                    (init_failures > max_init_failures).then_some(SupervisorError::FatalInit {
                        port,
                        attempts: init_failures,
                        reason,
                        diagnostics,
                    })
                }
                LaunchFailure::Fatal(error) => Some(error),
            };

            if let Some(error) = terminal {
                self.discard_process();
                self.set_state(InstanceState::Failed);
                return Err(error);
            }
            self.port_attempt += 1;
        }
    }

    fn launch_once(&mut self) -> Result<(), LaunchFailure> {
        self.discard_process();
        self.set_state(InstanceState::Launching);

        let config = self.paths.config_file();
        fs::write(&config, self.writer.render(&self.settings))
            .map_err(|source| SupervisorError::io("write config", &config, source))?;
        let port = self
            .allocator
            .allocate(self.port_attempt)
            .map_err(SupervisorError::from)?;
        self.port = Some(port);

        let line = self.plan.runtime(&config, port);
        let child = line
            .to_command()
            .stdin(Stdio::null())
            .stdout(files::truncate(&self.paths.stdout_log())?)
            .stderr(files::truncate(&self.paths.stderr_log())?)
            .spawn()
            .map_err(|source| SupervisorError::ProcessStart {
                program: line.program.clone(),
                source,
            })?;
        let process = ServerProcess::new(child);
        info!(
            target: SUPERVISOR_TARGET,
            pid = process.pid(),
            port,
            command = %line,
            "engine process started"
        );
        self.process = Some(process);

        self.set_state(InstanceState::ProbingConnectivity);
        let mut session = self.probe(port)?;
        self.set_state(InstanceState::Reconciling);
        self.reconcile_identity(port, session.as_mut())
    }

    fn probe(&mut self, port: u16) -> Result<Box<dyn Session>, LaunchFailure> {
        let timeout = self.settings.options.startup_timeout;
        let deadline = Instant::now() + timeout;
        let target = self.connect_target(port);
        loop {
            if !self.process_alive() {
                let diagnostics = self.diagnostics();
                self.discard_process();
                debug!(
                    target: SUPERVISOR_TARGET,
                    port,
                    "engine exited during probe"
                );
                return Err(LaunchFailure::PortConflict { port, diagnostics });
            }
            match self.connector.connect(&target) {
                Ok(session) => return Ok(session),
                Err(error) => trace!(
                    target: SUPERVISOR_TARGET,
                    port,
                    error = %error,
                    "engine not reachable yet"
                ),
            }
            if Instant::now() >= deadline {
                let diagnostics = self.diagnostics();
                self.discard_process();
                if self.signatures.matches(&diagnostics) {
                    return Err(LaunchFailure::PortConflict { port, diagnostics });
                }
                return Err(LaunchFailure::FatalInit {
                    port,
                    reason: format!("no session within {timeout:?}"),
                    diagnostics,
                });
            }
            thread::sleep(self.timings.probe_interval);
        }
    }

    fn reconcile_identity(
        &mut self,
        port: u16,
        session: &mut dyn Session,
    ) -> Result<(), LaunchFailure> {
        let stored = match identity::read_stored(session) {
            Ok(stored) => stored,
            Err(error) => {
                let diagnostics = self.diagnostics();
                self.discard_process();
                debug!(
                    target: SUPERVISOR_TARGET,
                    port,
                    error = %error,
                    "identity unreadable; treating the listener as foreign"
                );
                return Err(LaunchFailure::PortConflict { port, diagnostics });
            }
        };

        match identity::reconcile(
            &self.identity,
            stored.as_deref(),
            self.settings.options.allow_assimilation,
        ) {
            Reconciliation::Match => Ok(()),
            Reconciliation::Adopt => {
                identity::write_with_polling(
                    session,
                    &self.identity,
                    self.timings.identity_poll_attempts,
                    self.timings.identity_poll_interval,
                )
                .map_err(|error| {
                    let diagnostics = self.diagnostics();
                    self.discard_process();
                    LaunchFailure::FatalInit {
                        port,
                        reason: error.to_string(),
                        diagnostics,
                    }
                })?;
                info!(
                    target: SUPERVISOR_TARGET,
                    identity = %self.identity,
                    "identity adopted"
                );
                Ok(())
            }
            Reconciliation::Conflict { stored } => {
                self.discard_process();
                Err(LaunchFailure::IdentityConflict {
                    port,
                    found: stored,
                })
            }
        }
    }

    /// Runs [`Self::post_start`]. A failed setup stops the engine and marks
    /// the instance failed, so the next start launches and sets up afresh.
    pub(super) fn complete_start(&mut self) -> Result<(), SupervisorError> {
        let Err(error) = self.post_start() else {
            return Ok(());
        };
        warn!(
            target: SUPERVISOR_TARGET,
            error = %error,
            "post-start setup failed; stopping the engine"
        );
        if let Err(stop_error) = self.shutdown() {
            warn!(
                target: SUPERVISOR_TARGET,
                error = %stop_error,
                "engine did not stop after failed setup"
            );
        }
        self.set_state(InstanceState::Failed);
        Err(error)
    }

    /// One-time setup after the first successful launch: root credential,
    /// default schema, creation scripts.
    fn post_start(&mut self) -> Result<(), SupervisorError> {
        if self.setup_done {
            return Ok(());
        }
        let mut session = self.open_session()?;
        if !self.root_password_set {
            session.execute(&statements::set_root_password(
                &self.settings.options.root_password,
            ))?;
            self.root_password_set = true;
            let marker = self.paths.root_credential_marker();
            fs::write(&marker, b"")
                .map_err(|source| SupervisorError::io("write credential marker", &marker, source))?;
        }
        if let Some(schema) = &self.settings.options.default_schema {
            session.execute(&statements::create_schema(schema))?;
        }
        for script in &self.creation_scripts {
            session.execute(script)?;
        }
        self.setup_done = true;
        debug!(
            target: SUPERVISOR_TARGET,
            scripts = self.creation_scripts.len(),
            "post-start setup complete"
        );
        Ok(())
    }
}
