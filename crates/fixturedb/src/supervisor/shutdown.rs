//! Shutdown sequencing: ask the engine to stop, then make sure it has.

use tracing::{debug, info, warn};

use super::control::Core;
use super::state::InstanceState;
use super::{SHUTDOWN_TARGET, files};
use crate::engine::statements;
use crate::errors::SupervisorError;

impl Core {
    /// Stops the engine process.
    ///
    /// With graceful shutdown enabled the engine is asked to stop itself and
    /// given `graceful_timeout` to exit. Any process still alive afterwards is
    /// killed; if it outlives `kill_timeout` too the instance is marked failed
    /// and [`SupervisorError::StuckProcess`] is returned. Socket files are
    /// removed either way.
    pub(super) fn shutdown(&mut self) -> Result<(), SupervisorError> {
        if self.process.is_none() {
            self.finish_shutdown();
            return Ok(());
        }
        self.set_state(InstanceState::Stopping);

        if self.settings.options.graceful_shutdown && self.process_alive() {
            match self.request_engine_shutdown() {
                Ok(()) => {
                    let grace = self.timings.graceful_timeout;
                    let exited = self
                        .process
                        .as_mut()
                        .is_none_or(|process| process.wait_for_exit(grace));
                    debug!(
                        target: SHUTDOWN_TARGET,
                        exited,
                        "graceful shutdown requested"
                    );
                }
                Err(error) => {
                    warn!(
                        target: SHUTDOWN_TARGET,
                        error = %error,
                        "graceful shutdown failed; killing the engine"
                    );
                }
            }
        }

        if let Some(mut process) = self.process.take() {
            let pid = process.pid();
            if !process.terminate(self.timings.kill_timeout) {
                self.process = Some(process);
                self.remove_socket_files();
                self.set_state(InstanceState::Failed);
                return Err(SupervisorError::StuckProcess {
                    pid,
                    waited: self.timings.kill_timeout,
                });
            }
            info!(target: SHUTDOWN_TARGET, pid, "engine process stopped");
        }
        self.finish_shutdown();
        Ok(())
    }

    fn request_engine_shutdown(&self) -> Result<(), SupervisorError> {
        let mut session = self.open_session()?;
        session.execute(&statements::use_admin_schema())?;
        let others = session.query_column(&statements::list_other_connections())?;
        for id in others {
            let id = id.trim();
            if id.is_empty() || !id.bytes().all(|byte| byte.is_ascii_digit()) {
                continue;
            }
            if let Err(error) = session.execute(&statements::kill_connection(id)) {
                debug!(
                    target: SHUTDOWN_TARGET,
                    connection = id,
                    error = %error,
                    "could not kill client connection"
                );
            }
        }
        session.execute(&statements::shutdown())?;
        Ok(())
    }

    fn finish_shutdown(&mut self) {
        self.remove_socket_files();
        self.set_state(InstanceState::Stopped);
    }

    fn remove_socket_files(&self) {
        if let Some(socket) = &self.settings.engine.socket {
            files::remove_quietly(socket);
            files::remove_quietly(&socket.with_extension("sock.lock"));
        }
    }
}
