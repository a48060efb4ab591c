//! Stand-in `mysqld` used by the end-to-end tests.
//!
//! All behaviour lives in [`fixturedb_e2e::stub::run`].

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    fixturedb_e2e::stub::run(std::env::args_os(), &mut stdout, &mut stderr)
}
