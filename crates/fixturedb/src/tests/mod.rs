//! Crate-level tests that exercise the supervisor against scripted engines.

pub(crate) mod support;
