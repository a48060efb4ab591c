//! The subset of the `[mysqld]` option file the stub honours.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use super::StubError;

/// Options read from `--defaults-file`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubConfig {
    /// Interface to listen on.
    pub bind_address: String,
    /// Socket file to create, if any.
    pub socket: Option<Utf8PathBuf>,
    /// Error log, relative to the data directory unless absolute.
    pub log_error: Option<String>,
    /// Whether statements are appended to the general log.
    pub general_log: bool,
    /// General log, relative to the data directory unless absolute.
    pub general_log_file: Option<String>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_owned(),
            socket: None,
            log_error: None,
            general_log: false,
            general_log_file: None,
        }
    }
}

impl StubConfig {
    /// Loads `path`, keeping only keys from the `[mysqld]` section.
    pub fn load(path: &Utf8Path) -> Result<Self, StubError> {
        let text = fs::read_to_string(path).map_err(|source| StubError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parses option-file text. Unknown keys are ignored.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        let mut in_server = false;
        for line in text.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
                in_server = section.trim() == "mysqld";
                continue;
            }
            if !in_server {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim().trim_matches('"'))),
                None => (line, None),
            };
            match (key.replace('_', "-").as_str(), value) {
                ("bind-address", Some(value)) => value.clone_into(&mut config.bind_address),
                ("socket", Some(value)) => config.socket = Some(Utf8PathBuf::from(value)),
                ("log-error", Some(value)) => config.log_error = Some(value.to_owned()),
                ("general-log", value) => config.general_log = value.is_none_or(is_enabled),
                ("general-log-file", Some(value)) => {
                    config.general_log_file = Some(value.to_owned());
                }
                _ => {}
            }
        }
        config
    }
}

fn is_enabled(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "on" | "true")
}

/// Resolves an engine log name against the data directory.
#[must_use]
pub fn resolve_log(data_dir: &Utf8Path, name: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}
