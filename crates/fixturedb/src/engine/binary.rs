//! Locating the engine executable and memoising what was found.

use std::collections::HashMap;
use std::env;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, info};

use super::ENGINE_TARGET;
use super::version::EngineVersion;
use crate::errors::SupervisorError;

/// Errors raised while looking for the engine executable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// An explicitly configured binary does not exist.
    #[error("engine binary '{path}' does not exist")]
    Missing {
        /// Configured path.
        path: Utf8PathBuf,
    },
    /// The program was not found on `PATH`.
    #[error("'{program}' was not found on PATH")]
    NotOnPath {
        /// Program searched for.
        program: String,
    },
}

/// Finds the engine executable.
///
/// Platform-specific discovery (service registries, package layouts) lives
/// behind this trait; the supervisor only consumes the resolved path.
pub trait BinaryLocator: Send + Sync {
    /// Key under which a successful lookup is cached.
    fn cache_key(&self) -> String;

    /// Resolves the executable path.
    fn locate(&self) -> Result<Utf8PathBuf, LocateError>;
}

/// Uses a path the caller already knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedLocator {
    path: Utf8PathBuf,
}

impl FixedLocator {
    /// Builds a locator for `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BinaryLocator for FixedLocator {
    fn cache_key(&self) -> String {
        format!("fixed:{}", self.path)
    }

    fn locate(&self) -> Result<Utf8PathBuf, LocateError> {
        if self.path.is_file() {
            Ok(self.path.clone())
        } else {
            Err(LocateError::Missing {
                path: self.path.clone(),
            })
        }
    }
}

/// Searches the directories on `PATH` for a program name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLocator {
    program: String,
}

impl PathLocator {
    /// Builds a locator for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PathLocator {
    fn default() -> Self {
        Self::new("mysqld")
    }
}

impl BinaryLocator for PathLocator {
    fn cache_key(&self) -> String {
        format!("path:{}", self.program)
    }

    fn locate(&self) -> Result<Utf8PathBuf, LocateError> {
        let not_found = || LocateError::NotOnPath {
            program: self.program.clone(),
        };
        let search = env::var_os("PATH").ok_or_else(not_found)?;
        env::split_paths(&search)
            .filter_map(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .map(|dir| dir.join(&self.program))
            .find(|candidate| candidate.is_file())
            .ok_or_else(not_found)
    }
}

/// A located executable together with the version it reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineBinary {
    /// Executable path.
    pub path: Utf8PathBuf,
    /// Reported version.
    pub version: EngineVersion,
}

impl EngineBinary {
    /// Runs `<path> --version` and parses the result.
    pub fn probe(path: &Utf8Path) -> Result<Self, SupervisorError> {
        let output = Command::new(path)
            .arg("--version")
            .output()
            .map_err(|source| SupervisorError::ProcessStart {
                program: path.to_path_buf(),
                source,
            })?;
        let text = String::from_utf8_lossy(&output.stdout);
        let version =
            EngineVersion::parse(&text).map_err(|error| SupervisorError::VersionProbe {
                program: path.to_path_buf(),
                output: error.output,
            })?;
        debug!(
            target: ENGINE_TARGET,
            binary = %path,
            version = %version,
            "probed engine version"
        );
        Ok(Self {
            path: path.to_path_buf(),
            version,
        })
    }

    /// Base directory passed to the engine: the parent of the directory
    /// holding the executable (`<base>/bin/mysqld`).
    #[must_use]
    pub fn default_base_dir(&self) -> Utf8PathBuf {
        let bin_dir = self.path.parent().unwrap_or_else(|| Utf8Path::new("."));
        bin_dir.parent().unwrap_or(bin_dir).to_path_buf()
    }
}

static SHARED_CATALOG: Lazy<Arc<EngineCatalog>> = Lazy::new(|| Arc::new(EngineCatalog::new()));

/// Memoised engine lookups.
///
/// Discovery spawns the binary to read its version, so instances created in
/// the same test run share one result. The whole lookup runs under the lock:
/// concurrent callers wait for the first probe instead of racing it.
#[derive(Debug, Default)]
pub struct EngineCatalog {
    resolved: Mutex<HashMap<String, EngineBinary>>,
}

impl EngineCatalog {
    /// Builds an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog shared by every instance in this process.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(&SHARED_CATALOG)
    }

    /// Returns the cached binary for `locator`, locating and probing it on
    /// first use.
    pub fn resolve(&self, locator: &dyn BinaryLocator) -> Result<EngineBinary, SupervisorError> {
        let mut resolved = self.resolved.lock().unwrap_or_else(PoisonError::into_inner);
        let key = locator.cache_key();
        if let Some(binary) = resolved.get(&key) {
            return Ok(binary.clone());
        }
        let path = locator.locate()?;
        let binary = EngineBinary::probe(&path)?;
        info!(
            target: ENGINE_TARGET,
            binary = %binary.path,
            version = %binary.version,
            "resolved engine binary"
        );
        resolved.insert(key, binary.clone());
        Ok(binary)
    }

    /// Number of cached lookups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;

    struct CountingLocator {
        calls: AtomicUsize,
    }

    impl BinaryLocator for CountingLocator {
        fn cache_key(&self) -> String {
            "counting".to_owned()
        }

        fn locate(&self) -> Result<Utf8PathBuf, LocateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LocateError::NotOnPath {
                program: "mysqld".to_owned(),
            })
        }
    }

    #[test]
    fn fixed_locator_rejects_missing_files() {
        let locator = FixedLocator::new("/definitely/not/here/mysqld");
        assert_eq!(
            locator.locate(),
            Err(LocateError::Missing {
                path: Utf8PathBuf::from("/definitely/not/here/mysqld"),
            })
        );
    }

    #[test]
    fn fixed_locator_accepts_existing_files() {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("mysqld")).expect("utf-8 path");
        std::fs::write(&path, b"").expect("write fake binary");
        assert_eq!(FixedLocator::new(path.clone()).locate(), Ok(path));
    }

    #[test]
    fn failed_lookups_are_not_cached() {
        let catalog = EngineCatalog::new();
        let locator = CountingLocator {
            calls: AtomicUsize::new(0),
        };
        assert!(catalog.resolve(&locator).is_err());
        assert!(catalog.resolve(&locator).is_err());
        assert_eq!(locator.calls.load(Ordering::SeqCst), 2);
        assert!(catalog.is_empty());
    }

    #[test]
    fn base_dir_is_the_parent_of_bin() {
        let binary = EngineBinary {
            path: Utf8PathBuf::from("/opt/mysql/bin/mysqld"),
            version: EngineVersion::parse("mysqld Ver 8.0.36 for Linux on x86_64")
                .expect("version should parse"),
        };
        assert_eq!(binary.default_base_dir(), Utf8PathBuf::from("/opt/mysql"));
    }

    #[test]
    fn shared_catalog_is_a_single_instance() {
        assert!(Arc::ptr_eq(&EngineCatalog::shared(), &EngineCatalog::shared()));
    }
}
