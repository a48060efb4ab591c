//! Client-side seam to the running engine.
//!
//! The supervisor never speaks the engine's wire protocol itself. Callers
//! plug in a [`Connector`] backed by whichever client library they use; the
//! supervisor only needs to open a session and run a handful of statements.

use std::fmt;
use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Unix socket of the instance, for clients that prefer it.
    pub socket: Option<Utf8PathBuf>,
    /// Account name.
    pub user: String,
    /// Password, or `None` for a password-less account.
    pub password: Option<String>,
    /// Schema selected on connect.
    pub schema: Option<String>,
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Errors reported by a [`Connector`] or [`Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session could be established.
    #[error("could not connect to {target}: {message}")]
    Connect {
        /// Rendered connect target.
        target: String,
        /// Client library message.
        message: String,
    },
    /// The engine rejected a statement.
    #[error("statement '{statement}' failed: {message}")]
    Statement {
        /// Statement text.
        statement: String,
        /// Engine message.
        message: String,
    },
    /// The connection broke mid-conversation.
    #[error("connection lost: {0}")]
    Io(#[from] io::Error),
}

/// An open connection to the engine.
pub trait Session: Send {
    /// Runs a statement that returns no rows.
    fn execute(&mut self, statement: &str) -> Result<(), SessionError>;

    /// Runs a query and returns the first column of the first row, if any.
    fn query_scalar(&mut self, statement: &str) -> Result<Option<String>, SessionError>;

    /// Runs a query and returns the first column of every row.
    fn query_column(&mut self, statement: &str) -> Result<Vec<String>, SessionError>;
}

/// Opens sessions against an instance.
pub trait Connector: Send + Sync {
    /// Opens a new session.
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>, SessionError>;
}
