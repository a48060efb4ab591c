//! A stand-in for `mysqld` that honours the command-line contract the
//! supervisor relies on.
//!
//! `--version` prints a version banner, `--initialize-insecure` lays out an
//! empty data directory, and a plain run binds `--port` and serves the line
//! protocol from [`crate::protocol`] until a client sends `SHUTDOWN`. A busy
//! port is reported with the same wording the real engine uses.

mod config;
mod server;

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::net::TcpListener;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

pub use config::{StubConfig, resolve_log};
pub use server::{ROOT_PASSWORD_FILE, STATE_FILE, SYSTEM_DIR, literals};

const STUB_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::stub");

/// Version reported in the greeting.
pub const STUB_VERSION: &str = "8.0.36-stub";

/// Banner printed for `--version`.
pub const VERSION_BANNER: &str =
    "stub-mysqld  Ver 8.0.36-stub for Linux on x86_64 (fixturedb stub)";

/// Errors that stop the stub before it serves.
#[derive(Debug, Error)]
pub enum StubError {
    /// A required flag was absent.
    #[error("missing required option --{flag}")]
    MissingOption {
        /// Flag name without dashes.
        flag: &'static str,
    },
    /// A flag value did not parse.
    #[error("invalid value '{value}' for --{flag}")]
    InvalidOption {
        /// Flag name without dashes.
        flag: &'static str,
        /// Offending value.
        value: String,
    },
    /// An argument was not valid UTF-8.
    #[error("argument is not valid UTF-8: {0:?}")]
    NonUtf8Argument(OsString),
    /// `--initialize-insecure` found existing files.
    #[error("--initialize specified but the data directory {path} has files in it. Aborting.")]
    DataDirectoryPopulated {
        /// Data directory.
        path: Utf8PathBuf,
    },
    /// The data directory is missing at startup.
    #[error("Can't change dir to '{path}' (OS errno 2 - No such file or directory)")]
    DataDirectoryMissing {
        /// Data directory.
        path: Utf8PathBuf,
    },
    /// The listening port is taken.
    #[error(
        "Can't start server: Bind on TCP/IP port: Address already in use\n\
         Do you already have another mysqld server running on port: {port} ?"
    )]
    PortInUse {
        /// Requested port.
        port: u16,
    },
    /// Any other I/O failure.
    #[error("{path}: {source}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// What the stub was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Print the version banner.
    Version,
    /// Lay out a fresh data directory.
    Initialise {
        /// Data directory to create.
        data_dir: Utf8PathBuf,
    },
    /// Serve until shut down.
    Serve {
        /// Option file, if given.
        defaults_file: Option<Utf8PathBuf>,
        /// Data directory.
        data_dir: Utf8PathBuf,
        /// Port to bind.
        port: u16,
    },
}

impl Invocation {
    /// Parses the arguments after the program name.
    pub fn parse<I>(args: I) -> Result<Self, StubError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut version = false;
        let mut initialise = false;
        let mut defaults_file = None;
        let mut data_dir = None;
        let mut port = None;

        for arg in args {
            let arg = arg.into_string().map_err(StubError::NonUtf8Argument)?;
            if arg == "--version" || arg == "-V" {
                version = true;
            } else if arg == "--initialize-insecure" {
                initialise = true;
            } else if let Some(value) = arg.strip_prefix("--defaults-file=") {
                defaults_file = Some(Utf8PathBuf::from(value));
            } else if let Some(value) = arg.strip_prefix("--datadir=") {
                data_dir = Some(Utf8PathBuf::from(value));
            } else if let Some(value) = arg.strip_prefix("--port=") {
                port = Some(value.parse::<u16>().map_err(|_| StubError::InvalidOption {
                    flag: "port",
                    value: value.to_owned(),
                })?);
            }
        }

        if version {
            return Ok(Self::Version);
        }
        let data_dir = data_dir.ok_or(StubError::MissingOption { flag: "datadir" })?;
        if initialise {
            return Ok(Self::Initialise { data_dir });
        }
        Ok(Self::Serve {
            defaults_file,
            data_dir,
            port: port.ok_or(StubError::MissingOption { flag: "port" })?,
        })
    }
}

/// Runs the stub with `args` (including the program name).
pub fn run<I, O, E>(args: I, stdout: &mut O, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    O: Write,
    E: Write,
{
    let invocation = match Invocation::parse(args.into_iter().skip(1)) {
        Ok(invocation) => invocation,
        Err(error) => {
            let _ = writeln!(stderr, "[ERROR] [Server] {error}");
            return ExitCode::FAILURE;
        }
    };

    match invocation {
        Invocation::Version => {
            let _ = writeln!(stdout, "{VERSION_BANNER}");
            ExitCode::SUCCESS
        }
        Invocation::Initialise { data_dir } => match initialise(&data_dir) {
            Ok(()) => {
                let _ = writeln!(
                    stderr,
                    "[Warning] [Server] root@localhost is created with an empty password !"
                );
                ExitCode::SUCCESS
            }
            Err(error) => {
                let _ = writeln!(stderr, "[ERROR] [Server] {error}");
                ExitCode::FAILURE
            }
        },
        Invocation::Serve {
            defaults_file,
            data_dir,
            port,
        } => serve(defaults_file.as_deref(), &data_dir, port, stderr),
    }
}

fn initialise(data_dir: &Utf8Path) -> Result<(), StubError> {
    if server::is_populated(data_dir) {
        return Err(StubError::DataDirectoryPopulated {
            path: data_dir.to_path_buf(),
        });
    }
    let system = data_dir.join(SYSTEM_DIR);
    fs::create_dir_all(&system).map_err(|source| StubError::Io {
        path: system.clone(),
        source,
    })?;
    for path in [data_dir.join("ibdata1"), system.join("user.ibd")] {
        fs::write(&path, b"").map_err(|source| StubError::Io { path, source })?;
    }
    Ok(())
}

fn serve<E: Write>(
    defaults_file: Option<&Utf8Path>,
    data_dir: &Utf8Path,
    port: u16,
    stderr: &mut E,
) -> ExitCode {
    let config = match defaults_file.map(StubConfig::load).transpose() {
        Ok(config) => config.unwrap_or_default(),
        Err(error) => {
            let _ = writeln!(stderr, "[ERROR] [Server] {error}");
            return ExitCode::FAILURE;
        }
    };
    let mut log = EngineLog::new(
        config
            .log_error
            .as_deref()
            .map(|name| resolve_log(data_dir, name)),
        stderr,
    );

    let listener = match start(&config, data_dir, port) {
        Ok(listener) => listener,
        Err(error) => {
            log.line("ERROR", &error.to_string());
            log.line("ERROR", "Aborting");
            return ExitCode::FAILURE;
        }
    };
    let ready = format!(
        "{STUB_VERSION} ready for connections. Bind-address: '{}' port: {port}",
        config.bind_address
    );
    log.line("System", &ready);

    let general_log = config
        .general_log_file
        .as_deref()
        .filter(|_| config.general_log)
        .map(|name| resolve_log(data_dir, name));
    if server::Server::serve(listener, data_dir.to_path_buf(), general_log) {
        log.line("System", "Shutdown complete");
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn start(config: &StubConfig, data_dir: &Utf8Path, port: u16) -> Result<TcpListener, StubError> {
    if !data_dir.is_dir() {
        return Err(StubError::DataDirectoryMissing {
            path: data_dir.to_path_buf(),
        });
    }
    let listener =
        TcpListener::bind((config.bind_address.as_str(), port)).map_err(|source| {
            if source.kind() == io::ErrorKind::AddrInUse {
                StubError::PortInUse { port }
            } else {
                StubError::Io {
                    path: Utf8PathBuf::from(format!("{}:{port}", config.bind_address)),
                    source,
                }
            }
        })?;
    if let Some(socket) = &config.socket {
        fs::write(socket, b"").map_err(|source| StubError::Io {
            path: socket.clone(),
            source,
        })?;
    }
    Ok(listener)
}

/// Writes engine messages to the configured error log, or to stderr when
/// there is none.
struct EngineLog<'a, E: Write> {
    path: Option<Utf8PathBuf>,
    stderr: &'a mut E,
}

impl<'a, E: Write> EngineLog<'a, E> {
    const fn new(path: Option<Utf8PathBuf>, stderr: &'a mut E) -> Self {
        Self { path, stderr }
    }

    fn line(&mut self, level: &str, message: &str) {
        let text = format!("[{level}] [Server] {message}");
        let logged = self
            .path
            .as_deref()
            .is_some_and(|path| append_line(path, &text).is_ok());
        if !logged {
            let _ = writeln!(self.stderr, "{text}");
        }
    }
}

fn append_line(path: &Utf8Path, text: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{text}")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tempfile::TempDir;

    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[rstest]
    #[case(&["--version"], Invocation::Version)]
    #[case(
        &["--defaults-file=/i/init.cnf", "--initialize-insecure", "--basedir=/usr", "--datadir=/i/data"],
        Invocation::Initialise { data_dir: Utf8PathBuf::from("/i/data") },
    )]
    #[case(
        &["--defaults-file=/i/my.cnf", "--datadir=/i/data", "--port=13306", "--console"],
        Invocation::Serve {
            defaults_file: Some(Utf8PathBuf::from("/i/my.cnf")),
            data_dir: Utf8PathBuf::from("/i/data"),
            port: 13306,
        },
    )]
    fn parses_engine_command_lines(#[case] list: &[&str], #[case] expected: Invocation) {
        assert_eq!(Invocation::parse(args(list)).expect("parses"), expected);
    }

    #[test]
    fn serving_needs_a_port() {
        let error = Invocation::parse(args(&["--datadir=/d"])).expect_err("port is required");
        assert!(matches!(error, StubError::MissingOption { flag: "port" }));
    }

    #[test]
    fn version_banner_names_the_version_after_ver() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run(args(&["stub-mysqld", "--version"]), &mut stdout, &mut stderr);
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::SUCCESS));
        let banner = String::from_utf8(stdout).expect("utf-8");
        let version = fixturedb::engine::EngineVersion::parse(&banner).expect("banner parses");
        assert_eq!(version.major, 8);
    }

    #[test]
    fn initialisation_refuses_populated_directories() {
        let dir = TempDir::new().expect("temp dir");
        let data = Utf8PathBuf::from_path_buf(dir.path().join("data")).expect("utf-8");
        initialise(&data).expect("first initialisation succeeds");
        assert!(data.join(SYSTEM_DIR).join("user.ibd").is_file());
        assert!(matches!(
            initialise(&data),
            Err(StubError::DataDirectoryPopulated { .. })
        ));
    }

    #[test]
    fn busy_ports_are_reported_like_the_engine_does() {
        let dir = TempDir::new().expect("temp dir");
        let data = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8");
        let busy = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = busy.local_addr().expect("addr").port();

        let mut stderr = Vec::new();
        let code = serve(None, &data, port, &mut stderr);
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::FAILURE));
        let output = String::from_utf8(stderr).expect("utf-8");
        assert!(output.contains("Bind on TCP/IP port: Address already in use"));
    }
}
