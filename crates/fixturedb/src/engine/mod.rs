//! Everything specific to the `mysqld` engine family: locating and probing
//! the binary, building command lines, statement text, and log heuristics.

mod binary;
mod command;
mod signatures;
pub mod statements;
mod version;

pub use binary::{
    BinaryLocator, EngineBinary, EngineCatalog, FixedLocator, LocateError, PathLocator,
};
pub use command::{CommandLine, LaunchPlan};
pub use signatures::{DEFAULT_PORT_CONFLICT_SIGNATURES, PortConflictSignatures};
pub use version::{EngineVersion, VersionParseError};

pub(crate) const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");
