//! Materialises the data directory before the first launch.

use std::fs;
use std::process::Stdio;

use tracing::info;

use super::control::Core;
use super::state::InstanceState;
use super::{SUPERVISOR_TARGET, files};
use crate::errors::{Diagnostics, SupervisorError};

impl Core {
    /// Prepares the data directory once per instance.
    ///
    /// A non-empty directory is reused as is. Otherwise a configured template
    /// is copied in, and failing that the engine initialises an empty one.
    pub(super) fn initialise(&mut self) -> Result<(), SupervisorError> {
        if self.initialised {
            return Ok(());
        }
        files::create_dir_all(self.paths.root())?;
        self.set_state(InstanceState::Initializing);

        let data_dir = self.paths.data_dir().to_path_buf();
        if !files::dir_is_empty(&data_dir)? {
            self.root_password_set = self.paths.root_credential_marker().is_file();
            info!(
                target: SUPERVISOR_TARGET,
                data_dir = %data_dir,
                root_password_set = self.root_password_set,
                "reusing existing data directory"
            );
        } else if let Some(template) = self
            .settings
            .options
            .template_dir
            .clone()
            .filter(|template| template.is_dir())
        {
            let copied = files::copy_dir(&template, &data_dir)?;
            self.root_password_set = true;
            info!(
                target: SUPERVISOR_TARGET,
                template = %template,
                data_dir = %data_dir,
                files = copied,
                "data directory copied from template"
            );
        } else {
            self.run_initialisation()?;
        }
        self.initialised = true;
        Ok(())
    }

    fn run_initialisation(&mut self) -> Result<(), SupervisorError> {
        let data_dir = self.paths.data_dir().to_path_buf();
        let config = self.paths.init_config_file();
        let text = self.writer.render_initialisation(&self.settings);
        fs::write(&config, text)
            .map_err(|source| SupervisorError::io("write initialisation config", &config, source))?;
        files::create_dir_all(&data_dir)?;

        let line = self.plan.initialise(&config);
        info!(
            target: SUPERVISOR_TARGET,
            command = %line,
            "initialising data directory"
        );
        let output = line
            .to_command()
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SupervisorError::ProcessStart {
                program: line.program.clone(),
                source,
            })?;
        if !output.status.success() {
            let error_log = self
                .settings
                .engine
                .log_error
                .as_deref()
                .map(|name| files::read_tail(&self.paths.engine_log(name)))
                .unwrap_or_default();
            return Err(SupervisorError::Initialize {
                data_dir,
                status: output.status,
                diagnostics: Diagnostics {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    error_log,
                },
            });
        }
        self.root_password_set = false;
        Ok(())
    }
}
