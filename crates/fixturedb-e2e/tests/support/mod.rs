//! Shared scaffolding for scenarios driven against `stub-mysqld`.

use std::fs;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use fixturedb::engine::EngineCatalog;
use fixturedb::{EnvOverrides, Instance, PortRange, Settings, Timings};
use fixturedb_e2e::StubConnector;
use tempfile::TempDir;

/// Hint used by the first scenario that asks for a port block.
pub const FIRST_HINT: u16 = 13_306;
const BLOCK: u16 = 10;

static NEXT_BLOCK: AtomicU16 = AtomicU16::new(FIRST_HINT);

/// Hands out a hint whose next few ports are currently free.
///
/// Blocks never overlap between tests in one binary.
pub fn next_hint() -> u16 {
    loop {
        let hint = NEXT_BLOCK.fetch_add(BLOCK, Ordering::SeqCst);
        assert!(hint < 14_900, "ran out of scenario ports");
        if (hint..hint + 4).all(|port| TcpListener::bind(("127.0.0.1", port)).is_ok()) {
            return hint;
        }
    }
}

/// Path of the stub engine Cargo built for this package.
pub fn stub_binary() -> Utf8PathBuf {
    Utf8PathBuf::from(env!("CARGO_BIN_EXE_stub-mysqld"))
}

/// A scratch directory holding instance roots and templates.
pub struct Sandbox {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Sandbox {
    /// Creates an empty sandbox.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 temp dir");
        Self { _dir: dir, root }
    }

    /// Root of the sandbox.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Settings for a stub instance that starts at `hint`.
    pub fn settings(&self, hint: u16) -> Settings {
        let mut settings = Settings::default()
            .with_engine_binary(stub_binary())
            .with_base_path(self.root.join("instances"))
            .with_port_hint(hint);
        settings.options.port_range = PortRange::new(13_000, 14_999).expect("valid range");
        settings.options.startup_timeout = Duration::from_secs(10);
        settings.engine.general_log = true;
        settings
    }
}

/// Timings tight enough for tests yet generous for a loaded CI host.
pub fn timings() -> Timings {
    Timings {
        probe_interval: Duration::from_millis(20),
        watchdog_interval: Duration::from_millis(50),
        graceful_timeout: Duration::from_secs(5),
        kill_timeout: Duration::from_secs(5),
        identity_poll_attempts: 10,
        identity_poll_interval: Duration::from_millis(20),
    }
}

/// Builds an instance that talks to the stub over its line protocol.
pub fn build(settings: Settings) -> Instance {
    Instance::builder(
        settings,
        Arc::new(StubConnector::new().with_read_timeout(Duration::from_millis(500))),
    )
    .catalog(Arc::new(EngineCatalog::new()))
    .env_overrides(EnvOverrides::default())
    .timings(timings())
    .build()
    .expect("instance should build")
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    condition()
}

/// Reads a file the stub keeps in its system directory, if present.
pub fn system_file(data_dir: &Utf8Path, name: &str) -> Option<String> {
    fs::read_to_string(data_dir.join(fixturedb_e2e::stub::SYSTEM_DIR).join(name)).ok()
}

/// Statements the stub recorded in its general log.
pub fn general_log(data_dir: &Utf8Path) -> Vec<String> {
    fs::read_to_string(data_dir.join("general.log"))
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.splitn(3, '\t').nth(2).map(str::to_owned))
        .collect()
}
