use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

use super::files;
use crate::errors::SupervisorError;

/// Lifecycle state of a supervised instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InstanceState {
    /// Built but never started.
    Idle,
    /// Materialising the data directory.
    Initializing,
    /// Writing config, allocating a port and spawning the engine.
    Launching,
    /// Waiting for the engine to accept a session.
    ProbingConnectivity,
    /// Comparing the stored identity with ours.
    Reconciling,
    /// Serving sessions under watchdog supervision.
    Running,
    /// The shutdown sequence is in progress.
    Stopping,
    /// No engine process remains.
    Stopped,
    /// The last launch lost its port; another one is about to be tried.
    PortConflict,
    /// The last launch never became reachable; another one may be tried.
    FatalInitFailure,
    /// Retries are exhausted or a fatal error occurred.
    Failed,
}

impl InstanceState {
    /// Whether the watchdog has nothing left to supervise.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

/// Snapshot of an instance written to `instance.json` on every transition,
/// so an orphaned engine can be traced back to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Current state.
    pub state: InstanceState,
    /// Engine process id, when one is tracked.
    pub pid: Option<u32>,
    /// Port in use, when one is allocated.
    pub port: Option<u16>,
    /// Instance identity token.
    pub identity: String,
    /// Data directory.
    pub data_dir: Utf8PathBuf,
    /// Launches attempted so far.
    pub start_attempts: u32,
    /// Port-conflict retries so far.
    pub port_conflict_retries: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
}

impl InstanceRecord {
    pub(super) fn stamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs())
    }

    /// Reads a record previously written to `path`.
    pub fn read(path: &Utf8Path) -> Result<Self, SupervisorError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| SupervisorError::io("read instance record", path, source))?;
        serde_json::from_str(&text).map_err(|error| {
            SupervisorError::io(
                "parse instance record",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, error),
            )
        })
    }

    pub(super) fn write(&self, path: &Utf8Path) -> Result<(), SupervisorError> {
        let mut payload = serde_json::to_vec_pretty(self).map_err(|error| {
            SupervisorError::io(
                "serialise instance record",
                path,
                std::io::Error::new(std::io::ErrorKind::InvalidData, error),
            )
        })?;
        payload.push(b'\n');
        files::atomic_write(path, &payload)
            .map_err(|source| SupervisorError::io("write instance record", path, source))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    #[rstest]
    #[case(InstanceState::ProbingConnectivity, "probing_connectivity")]
    #[case(InstanceState::FatalInitFailure, "fatal_init_failure")]
    #[case(InstanceState::Running, "running")]
    fn states_render_in_snake_case(#[case] state: InstanceState, #[case] text: &str) {
        assert_eq!(state.to_string(), text);
        assert_eq!(
            serde_json::to_string(&state).expect("state should serialise"),
            format!("\"{text}\"")
        );
    }

    #[test]
    fn records_survive_a_write_and_read() {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("instance.json")).expect("utf-8");
        let record = InstanceRecord {
            state: InstanceState::Running,
            pid: Some(4242),
            port: Some(13306),
            identity: "0f8fad5b-d9cb-469f-a165-70867728950e".to_owned(),
            data_dir: Utf8PathBuf::from("/tmp/data"),
            start_attempts: 2,
            port_conflict_retries: 1,
            timestamp: InstanceRecord::stamp(),
        };
        record.write(&path).expect("record should be written");
        assert_eq!(InstanceRecord::read(&path).expect("record should parse"), record);
    }
}
