//! Defines the unified error surface for provisioning and supervising an
//! instance.

use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use camino::Utf8PathBuf;
use fixturedb_config::ConfigError;
use thiserror::Error;

use crate::engine::LocateError;
use crate::identity::IdentityError;
use crate::port::PortError;
use crate::session::SessionError;
use crate::supervisor::InstanceState;

/// Number of trailing lines of each captured stream shown in error messages.
const DISPLAY_TAIL_LINES: usize = 12;

/// Output captured from the engine for diagnosing a failed start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Contents of the engine's own error log, when it writes one.
    pub error_log: String,
}

impl Diagnostics {
    /// Whether any stream contains `needle`, ignoring ASCII case.
    #[must_use]
    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        [&self.stdout, &self.stderr, &self.error_log]
            .into_iter()
            .any(|stream| stream.to_ascii_lowercase().contains(&needle))
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stdout.trim().is_empty()
            && self.stderr.trim().is_empty()
            && self.error_log.trim().is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return formatter.write_str("no engine output captured");
        }
        let mut first = true;
        for (label, stream) in [
            ("stderr", &self.stderr),
            ("error log", &self.error_log),
            ("stdout", &self.stdout),
        ] {
            if stream.trim().is_empty() {
                continue;
            }
            if !first {
                formatter.write_str("; ")?;
            }
            first = false;
            let lines: Vec<&str> = stream.lines().collect();
            let tail = lines
                .get(lines.len().saturating_sub(DISPLAY_TAIL_LINES)..)
                .unwrap_or_default();
            write!(formatter, "{label}: {}", tail.join(" | "))?;
        }
        Ok(())
    }
}

/// Errors surfaced by the supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The operating system refused to create the engine process.
    #[error("failed to start '{program}': {source}")]
    ProcessStart {
        /// Executable that could not be started.
        program: Utf8PathBuf,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The engine could not listen on any of the ports tried.
    #[error("port conflict on {port} after {attempts} attempt(s): {diagnostics}")]
    PortConflict {
        /// Last port tried.
        port: u16,
        /// Port-conflict retries consumed.
        attempts: u32,
        /// Engine output from the last attempt.
        diagnostics: Diagnostics,
    },
    /// A differently identified instance answered on the port.
    #[error(
        "instance on port {port} carries identity '{found}', expected '{expected}' \
         (assimilation disabled)"
    )]
    IdentityConflict {
        /// Port the foreign instance answered on.
        port: u16,
        /// Identity of this instance.
        expected: String,
        /// Identity found in the engine.
        found: String,
    },
    /// The engine started but never became reachable.
    #[error("engine on port {port} failed to initialise after {attempts} attempt(s): {reason}; {diagnostics}")]
    FatalInit {
        /// Last port tried.
        port: u16,
        /// Attempts consumed.
        attempts: u32,
        /// Short description of the failure.
        reason: String,
        /// Engine output from the last attempt.
        diagnostics: Diagnostics,
    },
    /// The engine process did not exit even after being killed.
    #[error("engine process {pid} did not exit within {waited:?} of being killed")]
    StuckProcess {
        /// Process id of the stuck engine.
        pid: u32,
        /// Time spent waiting after the kill.
        waited: Duration,
    },
    /// The data directory path does not embed a GUID.
    #[error("data directory '{path}' does not contain a GUID segment")]
    InvalidDataDirectory {
        /// Offending path.
        path: Utf8PathBuf,
    },
    /// The first-time initialisation subcommand failed.
    #[error("initialising data directory '{data_dir}' failed with {status}: {diagnostics}")]
    Initialize {
        /// Data directory being initialised.
        data_dir: Utf8PathBuf,
        /// Exit status of the initialisation run.
        status: ExitStatus,
        /// Output of the initialisation run.
        diagnostics: Diagnostics,
    },
    /// The template target already holds data.
    #[error("template directory '{path}' already exists and is not empty")]
    TemplateExists {
        /// Template directory requested.
        path: Utf8PathBuf,
    },
    /// No usable port could be allocated.
    #[error(transparent)]
    Port(#[from] PortError),
    /// A statement against the running engine failed.
    #[error("engine session failed: {0}")]
    Session(#[from] SessionError),
    /// Reading or writing the stored identity failed.
    #[error("identity bookkeeping failed: {0}")]
    Identity(#[from] IdentityError),
    /// The engine binary could not be located.
    #[error(transparent)]
    Locate(#[from] LocateError),
    /// The engine's version output could not be parsed.
    #[error("could not parse version from '{program} --version' output: {output}")]
    VersionProbe {
        /// Executable probed.
        program: Utf8PathBuf,
        /// Raw output.
        output: String,
    },
    /// The operation requires a running instance.
    #[error("instance is {state}, expected running")]
    NotRunning {
        /// State the instance was in.
        state: InstanceState,
    },
    /// Environment overrides could not be applied.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A filesystem operation failed.
    #[error("{operation} '{path}' failed: {source}")]
    Io {
        /// What was being attempted.
        operation: &'static str,
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl SupervisorError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<Utf8PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_match_case_insensitively() {
        let diagnostics = Diagnostics {
            stderr: "[ERROR] Can't start server: Bind on TCP/IP port: ADDRESS already in use"
                .to_owned(),
            ..Diagnostics::default()
        };
        assert!(diagnostics.contains_ignore_case("address already in use"));
        assert!(!diagnostics.contains_ignore_case("out of memory"));
    }

    #[test]
    fn diagnostics_display_keeps_the_tail() {
        let stderr: Vec<String> = (0..40).map(|line| format!("line {line}")).collect();
        let diagnostics = Diagnostics {
            stderr: stderr.join("\n"),
            ..Diagnostics::default()
        };
        let rendered = diagnostics.to_string();
        assert!(rendered.contains("line 39"));
        assert!(!rendered.contains("line 3 |"));
    }

    #[test]
    fn empty_diagnostics_say_so() {
        assert_eq!(
            Diagnostics::default().to_string(),
            "no engine output captured"
        );
    }
}
