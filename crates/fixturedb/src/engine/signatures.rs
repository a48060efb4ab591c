//! Log heuristics that classify a failed launch as a port conflict.
//!
//! Engines word bind failures differently between releases, so this is a
//! best-effort match on known substrings. Callers extend the list through
//! `Options::port_conflict_signatures` rather than relying on it being
//! complete.

use crate::errors::Diagnostics;

/// Substrings the engine is known to log when its port is taken.
pub const DEFAULT_PORT_CONFLICT_SIGNATURES: &[&str] = &[
    "Address already in use",
    "Do you already have another mysqld server running on port",
    "Can't start server: Bind on TCP/IP port",
    "Only one usage of each socket address",
    "Unable to setup unix socket lock file",
];

/// Substrings that mark engine output as a port conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConflictSignatures {
    signatures: Vec<String>,
}

impl Default for PortConflictSignatures {
    fn default() -> Self {
        Self {
            signatures: DEFAULT_PORT_CONFLICT_SIGNATURES
                .iter()
                .map(|signature| (*signature).to_owned())
                .collect(),
        }
    }
}

impl PortConflictSignatures {
    /// Builds the default list extended with `extra`.
    #[must_use]
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut signatures = Self::default();
        signatures.signatures.extend(
            extra
                .into_iter()
                .map(Into::into)
                .filter(|signature: &String| !signature.trim().is_empty()),
        );
        signatures
    }

    /// Whether any captured stream contains a known signature.
    #[must_use]
    pub fn matches(&self, diagnostics: &Diagnostics) -> bool {
        self.signatures
            .iter()
            .any(|signature| diagnostics.contains_ignore_case(signature))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn stderr(text: &str) -> Diagnostics {
        Diagnostics {
            stderr: text.to_owned(),
            ..Diagnostics::default()
        }
    }

    #[rstest]
    #[case("[ERROR] [MY-010262] [Server] Can't start server: Bind on TCP/IP port: Address already in use")]
    #[case("[ERROR] Do you already have another mysqld server running on port: 13306 ?")]
    fn recognises_known_bind_failures(#[case] output: &str) {
        assert!(PortConflictSignatures::default().matches(&stderr(output)));
    }

    #[test]
    fn ignores_unrelated_failures() {
        let diagnostics = stderr("[ERROR] InnoDB: Cannot allocate memory for the buffer pool");
        assert!(!PortConflictSignatures::default().matches(&diagnostics));
    }

    #[test]
    fn extra_signatures_extend_the_defaults() {
        let signatures = PortConflictSignatures::with_extra(["listener refused", " "]);
        assert!(signatures.matches(&stderr("fatal: LISTENER REFUSED the port")));
        assert!(signatures.matches(&stderr("Address already in use")));
    }

    #[test]
    fn searches_the_error_log_too() {
        let diagnostics = Diagnostics {
            error_log: "Bind on TCP/IP port failed: Address already in use".to_owned(),
            ..Diagnostics::default()
        };
        assert!(PortConflictSignatures::default().matches(&diagnostics));
    }
}
