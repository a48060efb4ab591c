//! Settings for disposable `mysqld` test instances.
//!
//! A [`Settings`] value bundles three things: the engine tunables written to
//! the option file ([`EngineSettings`], described by the static
//! [`TUNABLES`] table), free-form per-section overrides
//! ([`ConfigOverrides`]), and supervisor [`Options`] such as port hints,
//! timeouts and the template directory. [`ConfigWriter`] turns a settings
//! value into option-file text deterministically, and [`EnvOverrides`] lets
//! the environment adjust a handful of options at run time.

mod defaults;
mod environment;
mod logging;
mod options;
mod overrides;
mod tunables;
mod writer;

use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_MAX_INIT_FAILURE_RETRIES, DEFAULT_MAX_PORT_CONFLICT_RETRIES,
    DEFAULT_PORT_MAX, DEFAULT_PORT_MIN, DEFAULT_ROOT_PASSWORD, DEFAULT_STARTUP_TIMEOUT,
    default_base_path, default_port_range,
};
pub use environment::{
    ConfigError, EnvOverrides, GRACEFUL_SHUTDOWN_VAR, PORT_HINT_VAR, STARTUP_TIMEOUT_VAR,
    TEMP_PATH_VAR, VERBOSE_VAR,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use options::{InvalidPortRange, Options, PortRange};
pub use overrides::{ConfigOverrides, SERVER_SECTION, normalise_key};
pub use tunables::{
    ERROR_LOG, EngineSettings, GENERAL_LOG, SLOW_LOG, TUNABLES, Tunable, TunableKind,
    TunableValue,
};
pub use writer::ConfigWriter;

/// Complete description of one requested instance.
///
/// Settings are assembled up front and then handed to the supervisor, which
/// only ever reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Tunables written to the `[mysqld]` section.
    pub engine: EngineSettings,
    /// Free-form entries applied after the tunables.
    pub overrides: ConfigOverrides,
    /// Supervisor options.
    pub options: Options,
}

impl Settings {
    /// Applies overrides from the process environment.
    pub fn with_environment(self) -> Result<Self, ConfigError> {
        let overrides = EnvOverrides::from_env()?;
        Ok(self.with_env_overrides(&overrides))
    }

    /// Applies already collected environment overrides.
    #[must_use]
    pub fn with_env_overrides(mut self, overrides: &EnvOverrides) -> Self {
        overrides.apply(&mut self.options);
        self
    }

    /// Sets the preferred first port.
    #[must_use]
    pub fn with_port_hint(mut self, port: u16) -> Self {
        self.options.port_hint = Some(port);
        self
    }

    /// Sets the engine executable explicitly.
    #[must_use]
    pub fn with_engine_binary(mut self, path: impl Into<camino::Utf8PathBuf>) -> Self {
        self.options.engine_binary = Some(path.into());
        self
    }

    /// Sets the directory that holds per-instance files.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<camino::Utf8PathBuf>) -> Self {
        self.options.base_path = path.into();
        self
    }

    /// Uses a previously initialised data directory as the starting point.
    #[must_use]
    pub fn with_template(mut self, path: impl Into<camino::Utf8PathBuf>) -> Self {
        self.options.template_dir = Some(path.into());
        self
    }

    /// Names the schema created after start.
    #[must_use]
    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.options.default_schema = Some(schema.into());
        self
    }
}
