//! Command lines for the engine executable.

use std::fmt;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};

use super::binary::EngineBinary;

/// A program plus its arguments, kept as data so it can be logged and
/// asserted on before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable.
    pub program: Utf8PathBuf,
    /// Arguments in order.
    pub args: Vec<String>,
}

impl CommandLine {
    /// Builds a [`Command`] with the program and arguments set.
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(self.program.as_std_path());
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.program.as_str())?;
        for arg in &self.args {
            write!(formatter, " {arg}")?;
        }
        Ok(())
    }
}

/// Everything needed to build the engine's command lines for one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    binary: EngineBinary,
    base_dir: Utf8PathBuf,
    data_dir: Utf8PathBuf,
    verbose: bool,
    graceful_shutdown: bool,
}

impl LaunchPlan {
    /// Builds a plan. `base_dir` falls back to the binary's installation
    /// root when not given.
    #[must_use]
    pub fn new(binary: EngineBinary, base_dir: Option<Utf8PathBuf>, data_dir: Utf8PathBuf) -> Self {
        let base_dir = base_dir.unwrap_or_else(|| binary.default_base_dir());
        Self {
            binary,
            base_dir,
            data_dir,
            verbose: false,
            graceful_shutdown: true,
        }
    }

    /// Adds the engine's verbose logging flags.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Whether the engine will be asked to shut down in-protocol. Without
    /// it the engine is told to skip its slow shutdown work.
    #[must_use]
    pub const fn graceful_shutdown(mut self, graceful: bool) -> Self {
        self.graceful_shutdown = graceful;
        self
    }

    /// The resolved engine binary.
    #[must_use]
    pub const fn binary(&self) -> &EngineBinary {
        &self.binary
    }

    /// Command line for a normal run listening on `port`.
    ///
    /// `--defaults-file` must come first; the engine ignores it anywhere else.
    #[must_use]
    pub fn runtime(&self, defaults_file: &Utf8Path, port: u16) -> CommandLine {
        let mut args = vec![
            format!("--defaults-file={defaults_file}"),
            format!("--basedir={}", self.base_dir),
            format!("--datadir={}", self.data_dir),
            format!("--port={port}"),
        ];
        if self.verbose {
            if self.binary.version.major >= 8 {
                args.push("--log-error-verbosity=3".to_owned());
            } else {
                args.push("--log-warnings=2".to_owned());
            }
        }
        if !self.graceful_shutdown {
            args.push("--innodb-fast-shutdown=2".to_owned());
        }
        if cfg!(windows) {
            args.push("--console".to_owned());
        }
        CommandLine {
            program: self.binary.path.clone(),
            args,
        }
    }

    /// Command line for the first-time initialisation of an empty data
    /// directory.
    #[must_use]
    pub fn initialise(&self, defaults_file: &Utf8Path) -> CommandLine {
        CommandLine {
            program: self.binary.path.clone(),
            args: vec![
                format!("--defaults-file={defaults_file}"),
                "--initialize-insecure".to_owned(),
                format!("--basedir={}", self.base_dir),
                format!("--datadir={}", self.data_dir),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;
    use crate::engine::EngineVersion;

    fn binary(version: &str) -> EngineBinary {
        EngineBinary {
            path: Utf8PathBuf::from("/opt/mysql/bin/mysqld"),
            version: EngineVersion::parse(&format!("mysqld Ver {version} for Linux on x86_64"))
                .expect("version should parse"),
        }
    }

    #[fixture]
    fn plan() -> LaunchPlan {
        LaunchPlan::new(
            binary("8.0.36"),
            None,
            Utf8PathBuf::from("/tmp/fixturedb/abc/data"),
        )
    }

    #[rstest]
    fn runtime_puts_the_defaults_file_first(plan: LaunchPlan) {
        let line = plan.runtime(Utf8Path::new("/tmp/fixturedb/abc/my.cnf"), 13306);
        assert_eq!(
            line.args.first().map(String::as_str),
            Some("--defaults-file=/tmp/fixturedb/abc/my.cnf")
        );
        assert!(line.args.contains(&"--basedir=/opt/mysql".to_owned()));
        assert!(line.args.contains(&"--datadir=/tmp/fixturedb/abc/data".to_owned()));
        assert!(line.args.contains(&"--port=13306".to_owned()));
    }

    #[rstest]
    #[case("8.0.36", "--log-error-verbosity=3")]
    #[case("5.7.44-log", "--log-warnings=2")]
    fn verbose_flags_follow_the_major_version(#[case] version: &str, #[case] flag: &str) {
        let plan = LaunchPlan::new(binary(version), None, Utf8PathBuf::from("/data")).verbose(true);
        let line = plan.runtime(Utf8Path::new("/my.cnf"), 1);
        assert!(line.args.iter().any(|arg| arg == flag));
    }

    #[rstest]
    fn fast_shutdown_only_without_graceful_shutdown(plan: LaunchPlan) {
        let graceful = plan.clone().runtime(Utf8Path::new("/my.cnf"), 1);
        assert!(!graceful.args.iter().any(|arg| arg.starts_with("--innodb-fast-shutdown")));

        let forced = plan
            .graceful_shutdown(false)
            .runtime(Utf8Path::new("/my.cnf"), 1);
        assert!(forced.args.contains(&"--innodb-fast-shutdown=2".to_owned()));
    }

    #[rstest]
    fn initialise_uses_its_own_defaults_file(plan: LaunchPlan) {
        let line = plan.initialise(Utf8Path::new("/tmp/fixturedb/abc/init.cnf"));
        assert_eq!(
            line.to_string(),
            "/opt/mysql/bin/mysqld --defaults-file=/tmp/fixturedb/abc/init.cnf \
             --initialize-insecure --basedir=/opt/mysql --datadir=/tmp/fixturedb/abc/data"
        );
    }

    #[rstest]
    fn explicit_base_dir_wins() {
        let plan = LaunchPlan::new(
            binary("8.0.36"),
            Some(Utf8PathBuf::from("/usr")),
            Utf8PathBuf::from("/data"),
        );
        let line = plan.runtime(Utf8Path::new("/my.cnf"), 1);
        assert!(line.args.contains(&"--basedir=/usr".to_owned()));
    }
}
