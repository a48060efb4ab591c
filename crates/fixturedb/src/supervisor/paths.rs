//! Derives the on-disk layout of one instance.

use camino::{Utf8Path, Utf8PathBuf};
use fixturedb_config::Options;
use uuid::Uuid;

use crate::errors::SupervisorError;
use crate::identity::InstanceIdentity;

/// Files and directories owned by one instance:
/// `<base_path>/<guid>/{data/, my.cnf, init.cnf, stdout.log, stderr.log,
/// mysqld.sock, instance.json}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstancePaths {
    root: Utf8PathBuf,
    data_dir: Utf8PathBuf,
}

impl InstancePaths {
    /// Resolves the layout for `options` and the identity it implies.
    ///
    /// A caller-supplied data directory keeps its location; everything else
    /// lives under `<base_path>/<guid>` where the GUID is taken from that
    /// directory. Without one, a fresh GUID is minted.
    pub fn resolve(options: &Options) -> Result<(Self, InstanceIdentity), SupervisorError> {
        match &options.data_dir {
            Some(data_dir) => {
                let identity = InstanceIdentity::derive_from_path(data_dir).ok_or_else(|| {
                    SupervisorError::InvalidDataDirectory {
                        path: data_dir.clone(),
                    }
                })?;
                let root = options.base_path.join(identity.as_str());
                Ok((
                    Self {
                        root,
                        data_dir: data_dir.clone(),
                    },
                    identity,
                ))
            }
            None => {
                let root = options.base_path.join(Uuid::new_v4().to_string());
                let data_dir = root.join("data");
                let identity = InstanceIdentity::derive_from_path(&data_dir).ok_or_else(|| {
                    SupervisorError::InvalidDataDirectory {
                        path: data_dir.clone(),
                    }
                })?;
                Ok((Self { root, data_dir }, identity))
            }
        }
    }

    /// Directory holding the instance's files.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Engine data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    /// Runtime option file.
    #[must_use]
    pub fn config_file(&self) -> Utf8PathBuf {
        self.root.join("my.cnf")
    }

    /// Option file used only by first-time initialisation.
    #[must_use]
    pub fn init_config_file(&self) -> Utf8PathBuf {
        self.root.join("init.cnf")
    }

    /// Captured standard output of the engine.
    #[must_use]
    pub fn stdout_log(&self) -> Utf8PathBuf {
        self.root.join("stdout.log")
    }

    /// Captured standard error of the engine.
    #[must_use]
    pub fn stderr_log(&self) -> Utf8PathBuf {
        self.root.join("stderr.log")
    }

    /// Default Unix socket location.
    #[must_use]
    pub fn socket(&self) -> Utf8PathBuf {
        self.root.join("mysqld.sock")
    }

    /// JSON state record.
    #[must_use]
    pub fn record_file(&self) -> Utf8PathBuf {
        self.root.join("instance.json")
    }

    /// Marker recording that the root credential has been assigned.
    #[must_use]
    pub fn root_credential_marker(&self) -> Utf8PathBuf {
        self.data_dir.join(".fixturedb-root-credential")
    }

    /// Resolves an engine log name relative to the data directory.
    #[must_use]
    pub fn engine_log(&self, name: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}
