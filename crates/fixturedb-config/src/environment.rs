//! Environment variables that override programmatic settings.
//!
//! Build hosts use these to loosen timeouts or enable engine logging without
//! touching test code. Every variable is optional; when present it wins over
//! whatever the caller configured.

use std::env;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::options::Options;

/// Maximum startup wait, in whole seconds.
pub const STARTUP_TIMEOUT_VAR: &str = "FIXTUREDB_STARTUP_TIMEOUT_SECS";
/// Verbose engine logging toggle.
pub const VERBOSE_VAR: &str = "FIXTUREDB_VERBOSE";
/// Graceful shutdown toggle.
pub const GRACEFUL_SHUTDOWN_VAR: &str = "FIXTUREDB_GRACEFUL_SHUTDOWN";
/// Root directory for per-instance files.
pub const TEMP_PATH_VAR: &str = "FIXTUREDB_TEMP_PATH";
/// Preferred first port.
pub const PORT_HINT_VAR: &str = "FIXTUREDB_PORT_HINT";

/// Errors raised while reading environment overrides.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable held a value that could not be parsed.
    #[error("environment variable {variable} has invalid value '{value}': expected {expected}")]
    InvalidValue {
        /// Name of the offending variable.
        variable: &'static str,
        /// Raw value found.
        value: String,
        /// Description of the accepted values.
        expected: &'static str,
    },
}

/// Overrides collected from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// Replacement for [`Options::startup_timeout`].
    pub startup_timeout: Option<Duration>,
    /// Replacement for [`Options::verbose`].
    pub verbose: Option<bool>,
    /// Replacement for [`Options::graceful_shutdown`].
    pub graceful_shutdown: Option<bool>,
    /// Replacement for [`Options::base_path`].
    pub temp_path: Option<Utf8PathBuf>,
    /// Replacement for [`Options::port_hint`].
    pub port_hint: Option<u16>,
}

impl EnvOverrides {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads overrides through `lookup`, which maps a variable name to its
    /// value. Empty values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Ok(Self {
            startup_timeout: read(STARTUP_TIMEOUT_VAR)
                .map(|value| parse_seconds(STARTUP_TIMEOUT_VAR, &value))
                .transpose()?,
            verbose: read(VERBOSE_VAR)
                .map(|value| parse_flag(VERBOSE_VAR, &value))
                .transpose()?,
            graceful_shutdown: read(GRACEFUL_SHUTDOWN_VAR)
                .map(|value| parse_flag(GRACEFUL_SHUTDOWN_VAR, &value))
                .transpose()?,
            temp_path: read(TEMP_PATH_VAR).map(|value| Utf8PathBuf::from(value.trim())),
            port_hint: read(PORT_HINT_VAR)
                .map(|value| parse_port(PORT_HINT_VAR, &value))
                .transpose()?,
        })
    }

    /// Writes every present override into `options`.
    pub fn apply(&self, options: &mut Options) {
        if let Some(timeout) = self.startup_timeout {
            options.startup_timeout = timeout;
        }
        if let Some(verbose) = self.verbose {
            options.verbose = verbose;
        }
        if let Some(graceful) = self.graceful_shutdown {
            options.graceful_shutdown = graceful;
        }
        if let Some(path) = &self.temp_path {
            options.base_path.clone_from(path);
        }
        if let Some(port) = self.port_hint {
            options.port_hint = Some(port);
        }
    }
}

fn parse_flag(variable: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(variable, value, "a boolean such as 1/0 or true/false")),
    }
}

fn parse_seconds(variable: &'static str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| invalid(variable, value, "a whole number of seconds"))
}

fn parse_port(variable: &'static str, value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(invalid(variable, value, "a TCP port between 1 and 65535")),
    }
}

fn invalid(variable: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        variable,
        value: value.to_owned(),
        expected,
    }
}
