//! Supervisor-level options that shape how an instance is provisioned,
//! reached, and torn down. None of these end up in the engine config file.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::defaults;

/// Inclusive range of TCP ports an instance may listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    min: u16,
    max: u16,
}

/// Error returned when a [`PortRange`] would be empty.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("port range {min}..={max} is empty")]
pub struct InvalidPortRange {
    /// Requested lower bound.
    pub min: u16,
    /// Requested upper bound.
    pub max: u16,
}

impl PortRange {
    /// Builds a range, rejecting `min > max` and port zero.
    pub fn new(min: u16, max: u16) -> Result<Self, InvalidPortRange> {
        if min == 0 || min > max {
            return Err(InvalidPortRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub(crate) const fn new_unchecked(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    /// Lowest port in the range.
    #[must_use]
    pub const fn min(&self) -> u16 {
        self.min
    }

    /// Highest port in the range.
    #[must_use]
    pub const fn max(&self) -> u16 {
        self.max
    }

    /// Number of ports covered by the range.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.max as u32 - self.min as u32 + 1
    }

    /// Always `false`; ranges are validated on construction.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Whether `port` lies inside the range.
    #[must_use]
    pub const fn contains(&self, port: u16) -> bool {
        port >= self.min && port <= self.max
    }
}

impl Default for PortRange {
    fn default() -> Self {
        defaults::default_port_range()
    }
}

/// Supervisor options carried alongside the engine tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Root under which per-instance directories are created.
    pub base_path: Utf8PathBuf,
    /// Explicit engine executable; when absent the binary is searched on `PATH`.
    pub engine_binary: Option<Utf8PathBuf>,
    /// Engine base directory; defaults to the parent of the binary's directory.
    pub base_dir: Option<Utf8PathBuf>,
    /// Caller-chosen data directory. Its path must embed a GUID.
    pub data_dir: Option<Utf8PathBuf>,
    /// Preferred first port. Retries walk upwards from here.
    pub port_hint: Option<u16>,
    /// Range used for random sampling and to clamp hinted ports.
    pub port_range: PortRange,
    /// Password assigned to the root account after first start.
    pub root_password: String,
    /// Schema created once the instance is running.
    pub default_schema: Option<String>,
    /// Stop the instance when no foreground call arrived for this long.
    pub inactivity_timeout: Option<Duration>,
    /// Stop the instance once it has existed for this long.
    pub lifetime: Option<Duration>,
    /// Ask the engine to shut itself down before killing it.
    pub graceful_shutdown: bool,
    /// Previously initialised data directory to copy instead of initialising.
    pub template_dir: Option<Utf8PathBuf>,
    /// Pass verbose logging flags to the engine.
    pub verbose: bool,
    /// Maximum wait for the engine to accept connections after launch.
    pub startup_timeout: Duration,
    /// Allow adopting a data directory that already carries another identity.
    pub allow_assimilation: bool,
    /// Ceiling on port-conflict retries within one start.
    pub max_port_conflict_retries: u32,
    /// Ceiling on unreachable-engine retries within one start.
    pub max_init_failure_retries: u32,
    /// Extra log substrings that mark a launch failure as a port conflict.
    pub port_conflict_signatures: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            base_path: defaults::default_base_path(),
            engine_binary: None,
            base_dir: None,
            data_dir: None,
            port_hint: None,
            port_range: PortRange::default(),
            root_password: defaults::DEFAULT_ROOT_PASSWORD.to_owned(),
            default_schema: None,
            inactivity_timeout: None,
            lifetime: None,
            graceful_shutdown: true,
            template_dir: None,
            verbose: false,
            startup_timeout: defaults::DEFAULT_STARTUP_TIMEOUT,
            allow_assimilation: false,
            max_port_conflict_retries: defaults::DEFAULT_MAX_PORT_CONFLICT_RETRIES,
            max_init_failure_retries: defaults::DEFAULT_MAX_INIT_FAILURE_RETRIES,
            port_conflict_signatures: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 10)]
    #[case(20, 10)]
    fn rejects_invalid_ranges(#[case] min: u16, #[case] max: u16) {
        let error = PortRange::new(min, max).expect_err("range should be rejected");
        assert_eq!(error, InvalidPortRange { min, max });
    }

    #[test]
    fn single_port_range_has_length_one() {
        let range = PortRange::new(4000, 4000).expect("range should build");
        assert_eq!(range.len(), 1);
        assert!(range.contains(4000));
        assert!(!range.contains(4001));
    }

    #[test]
    fn options_default_to_graceful_shutdown() {
        let options = Options::default();
        assert!(options.graceful_shutdown);
        assert!(!options.allow_assimilation);
        assert_eq!(options.port_hint, None);
    }
}
