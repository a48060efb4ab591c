//! Background supervision of a running instance.
//!
//! The watchdog thread wakes on a fixed interval, takes the per-instance lock
//! and relaunches the engine if its process has gone away. Foreground calls
//! steer it over a channel: pause while they restart the engine themselves,
//! resume afterwards, shut down when the instance stops.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::WATCHDOG_TARGET;
use super::control::Core;
use super::instance::lock_core;
use super::state::InstanceState;
use crate::errors::SupervisorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchdogCommand {
    Pause,
    Resume,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    Continue,
    Exit,
}

/// Foreground handle to a running watchdog thread.
#[derive(Debug)]
pub(super) struct WatchdogHandle {
    sender: Sender<WatchdogCommand>,
    thread: JoinHandle<()>,
}

impl WatchdogHandle {
    pub(super) fn spawn(core: Arc<Mutex<Core>>, interval: Duration) -> Result<Self, SupervisorError> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("fixturedb-watchdog".to_owned())
            .spawn(move || run(&core, &receiver, interval))
            .map_err(|source| SupervisorError::io("spawn watchdog", "fixturedb-watchdog", source))?;
        debug!(target: WATCHDOG_TARGET, interval_ms = interval.as_millis(), "watchdog started");
        Ok(Self { sender, thread })
    }

    /// Stops the watchdog from acting until [`Self::resume`].
    pub(super) fn pause(&self) {
        self.send(WatchdogCommand::Pause);
    }

    pub(super) fn resume(&self) {
        self.send(WatchdogCommand::Resume);
    }

    /// Whether the thread has returned on its own.
    pub(super) fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Tells the thread to exit and joins it. Must not be called while
    /// holding the instance lock.
    pub(super) fn shutdown(self) {
        self.send(WatchdogCommand::Shutdown);
        if self.thread.join().is_err() {
            warn!(target: WATCHDOG_TARGET, "watchdog thread panicked");
        }
    }

    fn send(&self, command: WatchdogCommand) {
        if self.sender.send(command).is_err() {
            debug!(target: WATCHDOG_TARGET, ?command, "watchdog already exited");
        }
    }
}

fn run(core: &Mutex<Core>, receiver: &Receiver<WatchdogCommand>, interval: Duration) {
    let mut paused = false;
    let mut observed_running = false;
    loop {
        match receiver.recv_timeout(interval) {
            Ok(WatchdogCommand::Pause) => {
                paused = true;
                continue;
            }
            Ok(WatchdogCommand::Resume) => {
                paused = false;
                continue;
            }
            Ok(WatchdogCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if paused {
            continue;
        }
        if tick(&mut lock_core(core), &mut observed_running) == Tick::Exit {
            break;
        }
    }
    debug!(target: WATCHDOG_TARGET, "watchdog exited");
}

fn tick(core: &mut Core, observed_running: &mut bool) -> Tick {
    if core.state.is_terminal() {
        return Tick::Exit;
    }
    if core.state == InstanceState::Running {
        *observed_running = true;
    }

    if let Some(reason) = core.expired(Instant::now()) {
        info!(
            target: WATCHDOG_TARGET,
            identity = %core.identity,
            reason,
            "instance timed out; stopping"
        );
        if let Err(error) = core.shutdown() {
            error!(target: WATCHDOG_TARGET, error = %error, "timed-out instance did not stop");
        }
        return Tick::Exit;
    }

    let Some(pid) = core.pid() else {
        if *observed_running {
            return relaunch(core);
        }
        debug!(
            target: WATCHDOG_TARGET,
            "no engine process was ever observed running; exiting"
        );
        return Tick::Exit;
    };
    if core.process_alive() {
        return Tick::Continue;
    }
    warn!(target: WATCHDOG_TARGET, pid, "engine process died; relaunching");
    relaunch(core)
}

fn relaunch(core: &mut Core) -> Tick {
    match core.launch_until_ready() {
        Ok(()) => {
            info!(
                target: WATCHDOG_TARGET,
                pid = core.pid(),
                port = core.port,
                "engine relaunched"
            );
            Tick::Continue
        }
        Err(error) => {
            error!(target: WATCHDOG_TARGET, error = %error, "relaunch failed");
            Tick::Exit
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use camino::Utf8PathBuf;
    use fixturedb_config::{EnvOverrides, Settings};
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;
    use crate::Instance;
    use crate::engine::EngineCatalog;
    use crate::tests::support::{MemoryConnector, ScriptedBehaviour, scripted_engine};

    fn unstarted_core(dir: &TempDir) -> Core {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        let settings = Settings::default()
            .with_engine_binary(scripted_engine(&root, ScriptedBehaviour::Serve))
            .with_base_path(root.join("instances"));
        Instance::builder(settings, MemoryConnector::unreachable())
            .catalog(Arc::new(EngineCatalog::new()))
            .env_overrides(EnvOverrides::default())
            .into_core()
            .expect("core should build")
    }

    #[rstest]
    #[case(InstanceState::Idle)]
    #[case(InstanceState::Launching)]
    #[case(InstanceState::Stopped)]
    fn exits_when_no_engine_was_ever_running(#[case] state: InstanceState) {
        let dir = TempDir::new().expect("temp dir");
        let mut core = unstarted_core(&dir);
        core.state = state;
        let mut observed_running = false;

        assert_eq!(tick(&mut core, &mut observed_running), Tick::Exit);
        assert!(!observed_running);
        assert_eq!(core.start_attempts, 0);
    }

    #[test]
    fn thread_exits_for_an_instance_that_never_started() {
        let dir = TempDir::new().expect("temp dir");
        let core = Arc::new(Mutex::new(unstarted_core(&dir)));
        let handle =
            WatchdogHandle::spawn(Arc::clone(&core), Duration::from_millis(10)).expect("spawn");

        let deadline = Instant::now() + Duration::from_secs(5);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(handle.is_finished(), "watchdog should exit on its own");
        assert_eq!(lock_core(&core).state, InstanceState::Idle);
        handle.shutdown();
    }
}
