//! End-to-end support for the `fixturedb` supervisor.
//!
//! Real engines are heavy to install in CI, so the scenarios in `tests/`
//! drive a stand-in instead:
//!
//! - [`stub`]: the `stub-mysqld` binary, which follows the engine's
//!   command-line contract and fails to bind exactly as the engine does
//! - [`protocol`]: the line protocol it serves
//! - [`StubConnector`]: a [`fixturedb::Connector`] speaking that protocol

mod connector;
pub mod protocol;
pub mod stub;

pub use connector::{StubConnector, StubSession};
