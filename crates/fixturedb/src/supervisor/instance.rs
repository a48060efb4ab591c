//! Public handle to one supervised instance.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use fixturedb_config::{ConfigWriter, EnvOverrides, Settings};
use tracing::{debug, warn};

use super::control::Core;
use super::paths::InstancePaths;
use super::state::InstanceState;
use super::watchdog::WatchdogHandle;
use crate::engine::{
    BinaryLocator, EngineCatalog, EngineVersion, FixedLocator, LaunchPlan, PathLocator,
    PortConflictSignatures,
};
use crate::errors::SupervisorError;
use crate::identity::InstanceIdentity;
use crate::port::PortAllocator;
use crate::session::{ConnectTarget, Connector, Session};

use super::SUPERVISOR_TARGET;

/// Polling intervals and deadlines used by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Pause between connectivity probes while the engine starts.
    pub probe_interval: Duration,
    /// Watchdog tick.
    pub watchdog_interval: Duration,
    /// Wait for the engine to exit after an in-protocol shutdown.
    pub graceful_timeout: Duration,
    /// Wait for the engine to exit after it was killed.
    pub kill_timeout: Duration,
    /// Identity write attempts before giving up.
    pub identity_poll_attempts: u32,
    /// Pause between identity write attempts.
    pub identity_poll_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_millis(100),
            watchdog_interval: Duration::from_millis(250),
            graceful_timeout: Duration::from_secs(10),
            kill_timeout: Duration::from_secs(10),
            identity_poll_attempts: 20,
            identity_poll_interval: Duration::from_millis(50),
        }
    }
}

pub(super) fn lock_core(core: &Mutex<Core>) -> MutexGuard<'_, Core> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects everything an [`Instance`] needs before it can be built.
pub struct InstanceBuilder {
    settings: Settings,
    connector: Arc<dyn Connector>,
    locator: Option<Box<dyn BinaryLocator>>,
    catalog: Arc<EngineCatalog>,
    environment: Option<EnvOverrides>,
    creation_scripts: Vec<String>,
    timings: Timings,
}

impl InstanceBuilder {
    /// Finds the engine executable with `locator` instead of the path in
    /// the options or a `PATH` search.
    #[must_use]
    pub fn locator(mut self, locator: impl BinaryLocator + 'static) -> Self {
        self.locator = Some(Box::new(locator));
        self
    }

    /// Memoises engine lookups in `catalog` instead of the process-wide one.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<EngineCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Uses `overrides` instead of reading the process environment.
    #[must_use]
    pub fn env_overrides(mut self, overrides: EnvOverrides) -> Self {
        self.environment = Some(overrides);
        self
    }

    /// Adds a statement run once after the first successful start.
    #[must_use]
    pub fn creation_script(mut self, statement: impl Into<String>) -> Self {
        self.creation_scripts.push(statement.into());
        self
    }

    /// Replaces the polling intervals and deadlines.
    #[must_use]
    pub const fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Resolves the engine binary and the instance layout.
    ///
    /// Nothing is written to disk and no process is started until
    /// [`Instance::start`].
    pub fn build(self) -> Result<Instance, SupervisorError> {
        Ok(Instance {
            core: Arc::new(Mutex::new(self.into_core()?)),
            watchdog: Mutex::new(None),
        })
    }

    pub(super) fn into_core(self) -> Result<Core, SupervisorError> {
        let environment = self.environment.map_or_else(EnvOverrides::from_env, Ok)?;
        let mut settings = self.settings.with_env_overrides(&environment);
        let locator: Box<dyn BinaryLocator> = match (self.locator, &settings.options.engine_binary) {
            (Some(locator), _) => locator,
            (None, Some(path)) => Box::new(FixedLocator::new(path.clone())),
            (None, None) => Box::new(PathLocator::default()),
        };
        let binary = self.catalog.resolve(locator.as_ref())?;

        let (paths, identity) = InstancePaths::resolve(&settings.options)?;
        if settings.engine.socket.is_none() {
            settings.engine.socket = Some(paths.socket());
        }
        let options = &settings.options;
        let plan = LaunchPlan::new(binary, options.base_dir.clone(), paths.data_dir().to_path_buf())
            .verbose(options.verbose)
            .graceful_shutdown(options.graceful_shutdown);
        let signatures =
            PortConflictSignatures::with_extra(options.port_conflict_signatures.iter().cloned());
        let allocator = PortAllocator::new(options.port_range, options.port_hint);
        debug!(
            target: SUPERVISOR_TARGET,
            identity = %identity,
            root = %paths.root(),
            engine = %plan.binary().path,
            "instance configured"
        );

        Ok(Core {
            settings,
            paths,
            identity,
            plan,
            connector: self.connector,
            signatures,
            allocator,
            writer: ConfigWriter::new(),
            creation_scripts: self.creation_scripts,
            timings: self.timings,
            state: InstanceState::Idle,
            process: None,
            port: None,
            port_attempt: 0,
            start_attempts: 0,
            port_conflict_retries: 0,
            root_password_set: false,
            initialised: false,
            setup_done: false,
            started_at: None,
            last_activity: Instant::now(),
        })
    }
}

/// A disposable engine instance.
///
/// Every operation that changes the instance runs under one lock shared with
/// the watchdog, so a watchdog relaunch never interleaves with a foreground
/// stop, restart or snapshot. Dropping a started instance stops it.
pub struct Instance {
    core: Arc<Mutex<Core>>,
    watchdog: Mutex<Option<WatchdogHandle>>,
}

impl Instance {
    /// Starts describing an instance.
    #[must_use]
    pub fn builder(settings: Settings, connector: Arc<dyn Connector>) -> InstanceBuilder {
        InstanceBuilder {
            settings,
            connector,
            locator: None,
            catalog: EngineCatalog::shared(),
            environment: None,
            creation_scripts: Vec::new(),
            timings: Timings::default(),
        }
    }

    /// Materialises the data directory if needed, launches the engine and
    /// hands it to the watchdog. Starting a running instance does nothing.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut watchdog = self.lock_watchdog();
        {
            let mut core = self.lock();
            core.touch();
            if core.state == InstanceState::Running && core.process_alive() {
                return Ok(());
            }
            core.initialise()?;
            core.launch_until_ready()?;
            core.complete_start()?;
        }
        self.ensure_watchdog(&mut watchdog)
    }

    /// Stops the engine and the watchdog.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let mut watchdog = self.lock_watchdog();
        if let Some(handle) = watchdog.as_ref() {
            handle.pause();
        }
        let result = self.lock().shutdown();
        if let Some(handle) = watchdog.take() {
            handle.shutdown();
        }
        result
    }

    /// Stops and relaunches the engine on the same data directory.
    pub fn restart(&self) -> Result<(), SupervisorError> {
        let mut watchdog = self.lock_watchdog();
        if let Some(handle) = watchdog.as_ref() {
            handle.pause();
        }
        let result = {
            let mut core = self.lock();
            core.touch();
            core.shutdown()
                .and_then(|()| core.initialise())
                .and_then(|()| core.launch_until_ready())
                .and_then(|()| core.complete_start())
        };
        match result {
            Ok(()) => self.ensure_watchdog(&mut watchdog),
            Err(error) => {
                if let Some(handle) = watchdog.take() {
                    handle.shutdown();
                }
                Err(error)
            }
        }
    }

    /// Copies the stopped data directory into `template_dir` (which must be
    /// missing or empty) with the identity cleared and transient logs
    /// removed, then relaunches.
    pub fn snapshot(&self, template_dir: impl AsRef<Utf8Path>) -> Result<(), SupervisorError> {
        let mut watchdog = self.lock_watchdog();
        if let Some(handle) = watchdog.as_ref() {
            handle.pause();
        }
        let result = self.lock().snapshot(template_dir.as_ref());
        match result {
            Ok(()) => self.ensure_watchdog(&mut watchdog),
            Err(error) => {
                if self.state() == InstanceState::Running {
                    if let Some(handle) = watchdog.as_ref() {
                        handle.resume();
                    }
                } else if let Some(handle) = watchdog.take() {
                    handle.shutdown();
                }
                Err(error)
            }
        }
    }

    /// Opens a root session on the running instance.
    pub fn connect(&self) -> Result<Box<dyn Session>, SupervisorError> {
        let mut core = self.lock();
        core.touch();
        if core.state != InstanceState::Running {
            return Err(SupervisorError::NotRunning { state: core.state });
        }
        core.open_session()
    }

    /// Runs one statement on a fresh root session.
    pub fn execute(&self, statement: &str) -> Result<(), SupervisorError> {
        let mut session = self.connect()?;
        session.execute(statement)?;
        Ok(())
    }

    /// Where and as whom callers with their own client should connect.
    pub fn connect_target(&self) -> Result<ConnectTarget, SupervisorError> {
        let core = self.lock();
        match (core.state, core.port) {
            (InstanceState::Running, Some(port)) => Ok(core.connect_target(port)),
            (state, _) => Err(SupervisorError::NotRunning { state }),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.lock().state
    }

    /// Port of the current or last launch.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.lock().port
    }

    /// Engine process id while a process is tracked.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid()
    }

    /// Identity token of this instance.
    #[must_use]
    pub fn identity(&self) -> InstanceIdentity {
        self.lock().identity.clone()
    }

    /// Version reported by the engine binary.
    #[must_use]
    pub fn version(&self) -> EngineVersion {
        self.lock().plan.binary().version.clone()
    }

    /// Engine data directory.
    #[must_use]
    pub fn data_dir(&self) -> Utf8PathBuf {
        self.lock().paths.data_dir().to_path_buf()
    }

    /// On-disk layout of the instance.
    #[must_use]
    pub fn paths(&self) -> InstancePaths {
        self.lock().paths.clone()
    }

    /// Launch attempts made so far, across every start and relaunch.
    #[must_use]
    pub fn start_attempts(&self) -> u32 {
        self.lock().start_attempts
    }

    /// Port-conflict retries consumed so far.
    #[must_use]
    pub fn port_conflict_retries(&self) -> u32 {
        self.lock().port_conflict_retries
    }

    /// Whether the root account carries the configured password.
    #[must_use]
    pub fn root_password_set(&self) -> bool {
        self.lock().root_password_set
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        lock_core(&self.core)
    }

    fn lock_watchdog(&self) -> MutexGuard<'_, Option<WatchdogHandle>> {
        self.watchdog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_watchdog(&self, watchdog: &mut Option<WatchdogHandle>) -> Result<(), SupervisorError> {
        if let Some(handle) = watchdog.take() {
            if handle.is_finished() {
                handle.shutdown();
            } else {
                handle.resume();
                *watchdog = Some(handle);
                return Ok(());
            }
        }
        let interval = self.lock().timings.watchdog_interval;
        *watchdog = Some(WatchdogHandle::spawn(Arc::clone(&self.core), interval)?);
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if matches!(self.state(), InstanceState::Idle | InstanceState::Stopped) {
            return;
        }
        if let Err(error) = self.stop() {
            warn!(
                target: SUPERVISOR_TARGET,
                error = %error,
                "failed to stop instance on drop"
            );
        }
    }
}
