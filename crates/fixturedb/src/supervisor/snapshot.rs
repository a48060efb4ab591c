//! Freezes a running instance into a reusable template.

use camino::Utf8Path;
use tracing::info;

use super::control::Core;
use super::state::InstanceState;
use super::{SUPERVISOR_TARGET, files};
use crate::errors::SupervisorError;
use crate::identity;

impl Core {
    /// Freezes the data directory into `template_dir` and relaunches.
    ///
    /// The stored identity is cleared first so instances started from the
    /// template adopt their own, and transient engine logs are left behind.
    pub(super) fn snapshot(&mut self, template_dir: &Utf8Path) -> Result<(), SupervisorError> {
        if self.state != InstanceState::Running {
            return Err(SupervisorError::NotRunning { state: self.state });
        }
        if !files::dir_is_empty(template_dir)? {
            return Err(SupervisorError::TemplateExists {
                path: template_dir.to_path_buf(),
            });
        }

        let mut session = self.open_session()?;
        identity::clear_stored(session.as_mut())?;
        drop(session);
        self.shutdown()?;

        for name in self.settings.engine.transient_log_files() {
            files::remove_quietly(&self.paths.engine_log(name));
        }
        let copied = files::copy_dir(self.paths.data_dir(), template_dir)?;
        info!(
            target: SUPERVISOR_TARGET,
            template = %template_dir,
            files = copied,
            "snapshot written"
        );

        self.launch_until_ready()
    }
}
