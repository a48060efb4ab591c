//! Engine tunables and the static table that maps them onto config keys.
//!
//! [`TUNABLES`] is the single source of truth for rendering: it lists every
//! tunable in output order together with its on-disk key, how the value is
//! written, and whether an unset value is dropped from the file.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// Engine tuning values rendered into the `[mysqld]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Interface the engine listens on.
    pub bind_address: Option<String>,
    /// Unix socket path. The supervisor fills this in per instance.
    pub socket: Option<Utf8PathBuf>,
    /// Server character set.
    pub character_set_server: Option<String>,
    /// Server collation.
    pub collation_server: Option<String>,
    /// Storage engine for new tables.
    pub default_storage_engine: Option<String>,
    /// Maximum simultaneous client connections.
    pub max_connections: Option<u32>,
    /// Size of the `InnoDB` buffer pool, in engine notation (`64M`).
    pub innodb_buffer_pool_size: Option<String>,
    /// `InnoDB` log flush policy.
    pub innodb_flush_log_at_trx_commit: Option<u8>,
    /// SQL mode. An unset value renders as an explicitly empty mode.
    pub sql_mode: Option<String>,
    /// Identifier case handling. Must match between initialisation and runtime.
    pub lower_case_table_names: Option<u8>,
    /// Error log, relative to the data directory.
    pub log_error: Option<String>,
    /// Whether the general query log is enabled.
    pub general_log: bool,
    /// General query log, relative to the data directory.
    pub general_log_file: Option<String>,
    /// Whether the slow query log is enabled.
    pub slow_query_log: bool,
    /// Slow query log, relative to the data directory.
    pub slow_query_log_file: Option<String>,
    /// Skip DNS lookups for connecting clients.
    pub skip_name_resolve: bool,
    /// Enable the binary log. Rendered as `skip-log-bin` when disabled.
    pub log_bin: bool,
    /// Enable the performance schema.
    pub performance_schema: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            bind_address: Some("127.0.0.1".to_owned()),
            socket: None,
            character_set_server: Some("utf8mb4".to_owned()),
            collation_server: None,
            default_storage_engine: Some("InnoDB".to_owned()),
            max_connections: None,
            innodb_buffer_pool_size: Some("64M".to_owned()),
            innodb_flush_log_at_trx_commit: Some(2),
            sql_mode: Some("STRICT_TRANS_TABLES,NO_ENGINE_SUBSTITUTION".to_owned()),
            lower_case_table_names: None,
            log_error: Some(ERROR_LOG.to_owned()),
            general_log: false,
            general_log_file: Some(GENERAL_LOG.to_owned()),
            slow_query_log: false,
            slow_query_log_file: Some(SLOW_LOG.to_owned()),
            skip_name_resolve: true,
            log_bin: false,
            performance_schema: false,
        }
    }
}

/// Default error log file name inside the data directory.
pub const ERROR_LOG: &str = "error.log";
/// Default general query log file name inside the data directory.
pub const GENERAL_LOG: &str = "general.log";
/// Default slow query log file name inside the data directory.
pub const SLOW_LOG: &str = "slow.log";

impl EngineSettings {
    /// Log files the engine writes into its data directory.
    ///
    /// These are transient and are removed before a data directory is frozen
    /// into a template.
    #[must_use]
    pub fn transient_log_files(&self) -> Vec<&str> {
        [
            self.log_error.as_deref(),
            self.general_log_file.as_deref(),
            self.slow_query_log_file.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// How a tunable is written to the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunableKind {
    /// `key = value`.
    Value,
    /// `key = 1` or `key = 0`.
    Switch,
    /// A bare `key` when true. When false, `when_false` is written instead if
    /// present, otherwise nothing.
    Bare {
        /// Bare key written when the flag is off.
        when_false: Option<&'static str>,
    },
}

/// Value read from [`EngineSettings`] for a single tunable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunableValue {
    /// No value configured.
    Unset,
    /// Textual value.
    Text(String),
    /// Boolean value for switches and bare flags.
    Flag(bool),
}

impl TunableValue {
    fn text<T: ToString + ?Sized>(value: Option<&T>) -> Self {
        value.map_or(Self::Unset, |inner| Self::Text(inner.to_string()))
    }
}

/// Static description of one tunable.
#[derive(Debug, Clone, Copy)]
pub struct Tunable {
    /// Field name on [`EngineSettings`].
    pub name: &'static str,
    /// Canonical key in the config file.
    pub key: &'static str,
    /// Rendering rule.
    pub kind: TunableKind,
    /// Drop the line entirely when the value is unset.
    pub omit_if_unset: bool,
    /// Also written to the throwaway initialisation config.
    pub at_initialisation: bool,
    read: fn(&EngineSettings) -> TunableValue,
}

impl Tunable {
    /// Reads this tunable's current value.
    #[must_use]
    pub fn value(&self, settings: &EngineSettings) -> TunableValue {
        (self.read)(settings)
    }
}

/// Every tunable, in the order it is written.
pub const TUNABLES: &[Tunable] = &[
    Tunable {
        name: "bind_address",
        key: "bind-address",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::text(s.bind_address.as_deref()),
    },
    Tunable {
        name: "socket",
        key: "socket",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::text(s.socket.as_deref().map(camino::Utf8Path::as_str)),
    },
    Tunable {
        name: "character_set_server",
        key: "character-set-server",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: true,
        read: |s| TunableValue::text(s.character_set_server.as_deref()),
    },
    Tunable {
        name: "collation_server",
        key: "collation-server",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: true,
        read: |s| TunableValue::text(s.collation_server.as_deref()),
    },
    Tunable {
        name: "default_storage_engine",
        key: "default-storage-engine",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: true,
        read: |s| TunableValue::text(s.default_storage_engine.as_deref()),
    },
    Tunable {
        name: "max_connections",
        key: "max-connections",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::text(s.max_connections.as_ref()),
    },
    Tunable {
        name: "innodb_buffer_pool_size",
        key: "innodb-buffer-pool-size",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: true,
        read: |s| TunableValue::text(s.innodb_buffer_pool_size.as_deref()),
    },
    Tunable {
        name: "innodb_flush_log_at_trx_commit",
        key: "innodb-flush-log-at-trx-commit",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::text(s.innodb_flush_log_at_trx_commit.as_ref()),
    },
    Tunable {
        name: "sql_mode",
        key: "sql-mode",
        kind: TunableKind::Value,
        omit_if_unset: false,
        at_initialisation: false,
        read: |s| TunableValue::text(s.sql_mode.as_deref()),
    },
    Tunable {
        name: "lower_case_table_names",
        key: "lower-case-table-names",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: true,
        read: |s| TunableValue::text(s.lower_case_table_names.as_ref()),
    },
    Tunable {
        name: "log_error",
        key: "log-error",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::text(s.log_error.as_deref()),
    },
    Tunable {
        name: "general_log",
        key: "general-log",
        kind: TunableKind::Switch,
        omit_if_unset: false,
        at_initialisation: false,
        read: |s| TunableValue::Flag(s.general_log),
    },
    Tunable {
        name: "general_log_file",
        key: "general-log-file",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::text(s.general_log_file.as_deref()),
    },
    Tunable {
        name: "slow_query_log",
        key: "slow-query-log",
        kind: TunableKind::Switch,
        omit_if_unset: false,
        at_initialisation: false,
        read: |s| TunableValue::Flag(s.slow_query_log),
    },
    Tunable {
        name: "slow_query_log_file",
        key: "slow-query-log-file",
        kind: TunableKind::Value,
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::text(s.slow_query_log_file.as_deref()),
    },
    Tunable {
        name: "skip_name_resolve",
        key: "skip-name-resolve",
        kind: TunableKind::Bare { when_false: None },
        omit_if_unset: true,
        at_initialisation: false,
        read: |s| TunableValue::Flag(s.skip_name_resolve),
    },
    Tunable {
        name: "log_bin",
        key: "log-bin",
        kind: TunableKind::Bare {
            when_false: Some("skip-log-bin"),
        },
        omit_if_unset: true,
        at_initialisation: true,
        read: |s| TunableValue::Flag(s.log_bin),
    },
    Tunable {
        name: "performance_schema",
        key: "performance-schema",
        kind: TunableKind::Switch,
        omit_if_unset: false,
        at_initialisation: false,
        read: |s| TunableValue::Flag(s.performance_schema),
    },
];
