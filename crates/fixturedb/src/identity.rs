//! Instance identity: the GUID token that ties an engine to its data
//! directory.
//!
//! Every data directory path embeds a GUID. Once the engine is reachable the
//! same token is stored inside the engine, which lets the supervisor tell its
//! own instance apart from a template-born copy or a stranger squatting on
//! the port.

use std::fmt;
use std::thread;
use std::time::Duration;

use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::engine::statements;
use crate::session::{Session, SessionError};

const IDENTITY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::identity");

#[expect(
    clippy::expect_used,
    reason = "the pattern is a literal and is exercised by unit tests"
)]
static GUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("GUID pattern should compile")
});

/// Token identifying one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceIdentity(String);

impl InstanceIdentity {
    /// Extracts the token from the last GUID-shaped segment of `path`.
    ///
    /// Returns `None` when the path carries no GUID; callers must name data
    /// directories accordingly.
    #[must_use]
    pub fn derive_from_path(path: &Utf8Path) -> Option<Self> {
        GUID_PATTERN
            .find_iter(path.as_str())
            .last()
            .map(|found| Self(found.as_str().to_ascii_lowercase()))
    }

    /// The token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn matches(&self, stored: &str) -> bool {
        self.0.eq_ignore_ascii_case(stored.trim())
    }
}

impl fmt::Display for InstanceIdentity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Outcome of comparing the expected token with the one stored in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// The engine already carries this instance's token.
    Match,
    /// The engine carries no token, or assimilation is allowed; write ours.
    Adopt,
    /// Another instance owns the engine answering on this port.
    Conflict {
        /// Token found in the engine.
        stored: String,
    },
}

/// Decides how to treat the engine answering on our port.
#[must_use]
pub fn reconcile(
    expected: &InstanceIdentity,
    stored: Option<&str>,
    allow_assimilation: bool,
) -> Reconciliation {
    match stored.map(str::trim).filter(|token| !token.is_empty()) {
        None => Reconciliation::Adopt,
        Some(token) if expected.matches(token) => Reconciliation::Match,
        Some(_) if allow_assimilation => Reconciliation::Adopt,
        Some(token) => Reconciliation::Conflict {
            stored: token.to_owned(),
        },
    }
}

/// Errors raised while reading or writing the stored identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A statement failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The write never became visible to reads.
    #[error("identity '{token}' not visible after {attempts} write attempts")]
    NotVisible {
        /// Token written.
        token: String,
        /// Attempts made.
        attempts: u32,
    },
}

/// Reads the identity stored in the engine, creating the backing table on
/// first use.
pub fn read_stored(session: &mut dyn Session) -> Result<Option<String>, IdentityError> {
    session.execute(&statements::ensure_state_table())?;
    Ok(session.query_scalar(&statements::select_identity())?)
}

/// Writes `identity` and polls until a read returns it.
///
/// Some engines expose the write to readers with a delay, so each attempt
/// rewrites the row before reading it back.
pub fn write_with_polling(
    session: &mut dyn Session,
    identity: &InstanceIdentity,
    attempts: u32,
    interval: Duration,
) -> Result<(), IdentityError> {
    for attempt in 1..=attempts.max(1) {
        session.execute(&statements::store_identity(identity.as_str()))?;
        let stored = session.query_scalar(&statements::select_identity())?;
        if stored.as_deref().is_some_and(|token| identity.matches(token)) {
            debug!(
                target: IDENTITY_TARGET,
                identity = %identity,
                attempt,
                "identity written"
            );
            return Ok(());
        }
        thread::sleep(interval);
    }
    Err(IdentityError::NotVisible {
        token: identity.to_string(),
        attempts: attempts.max(1),
    })
}

/// Removes the stored identity so a frozen copy carries none.
pub fn clear_stored(session: &mut dyn Session) -> Result<(), IdentityError> {
    session.execute(&statements::ensure_state_table())?;
    session.execute(&statements::clear_identity())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;
    use rstest::rstest;

    use super::*;
    use crate::tests::support::MockEngineSession;

    const TOKEN: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";

    fn identity() -> InstanceIdentity {
        InstanceIdentity::derive_from_path(Utf8Path::new(&format!("/tmp/fixturedb/{TOKEN}/data")))
            .expect("path should carry a GUID")
    }

    #[rstest]
    #[case("/tmp/fixturedb/0F8FAD5B-D9CB-469F-A165-70867728950E/data")]
    #[case("/tmp/0f8fad5b-d9cb-469f-a165-70867728950e")]
    #[case("/tmp/aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa/0f8fad5b-d9cb-469f-a165-70867728950e/x")]
    fn derives_the_last_guid(#[case] path: &str) {
        let derived = InstanceIdentity::derive_from_path(Utf8Path::new(path))
            .expect("path should carry a GUID");
        assert_eq!(derived.as_str(), TOKEN);
    }

    #[test]
    fn paths_without_guid_yield_none() {
        assert_eq!(
            InstanceIdentity::derive_from_path(Utf8Path::new("/tmp/fixturedb/data")),
            None
        );
    }

    #[rstest]
    #[case(None, false, Reconciliation::Adopt)]
    #[case(Some(""), false, Reconciliation::Adopt)]
    #[case(Some(TOKEN), false, Reconciliation::Match)]
    #[case(Some("0F8FAD5B-D9CB-469F-A165-70867728950E"), false, Reconciliation::Match)]
    #[case(Some("other"), true, Reconciliation::Adopt)]
    #[case(Some("other"), false, Reconciliation::Conflict { stored: "other".to_owned() })]
    fn reconciles_stored_tokens(
        #[case] stored: Option<&str>,
        #[case] allow_assimilation: bool,
        #[case] expected: Reconciliation,
    ) {
        assert_eq!(reconcile(&identity(), stored, allow_assimilation), expected);
    }

    #[test]
    fn write_polls_until_visible() {
        let mut session = MockEngineSession::new();
        let mut sequence = Sequence::new();
        session
            .expect_execute()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));
        session
            .expect_query_scalar()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(None));
        session
            .expect_execute()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(()));
        session
            .expect_query_scalar()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_| Ok(Some(TOKEN.to_owned())));

        write_with_polling(&mut session, &identity(), 5, Duration::from_millis(1))
            .expect("second attempt should observe the write");
    }

    #[test]
    fn write_gives_up_after_the_attempt_budget() {
        let mut session = MockEngineSession::new();
        session.expect_execute().times(3).returning(|_| Ok(()));
        session
            .expect_query_scalar()
            .times(3)
            .returning(|_| Ok(Some("stale".to_owned())));

        let error = write_with_polling(&mut session, &identity(), 3, Duration::from_millis(1))
            .expect_err("write should never become visible");
        assert!(matches!(error, IdentityError::NotVisible { attempts: 3, .. }));
    }

    #[test]
    fn read_creates_the_state_table_first() {
        let mut session = MockEngineSession::new();
        session
            .expect_execute()
            .withf(|statement| statement.starts_with("CREATE TABLE IF NOT EXISTS"))
            .times(1)
            .returning(|_| Ok(()));
        session
            .expect_query_scalar()
            .returning(|_| Ok(Some(TOKEN.to_owned())));

        let stored = read_stored(&mut session).expect("read should succeed");
        assert_eq!(stored.as_deref(), Some(TOKEN));
    }
}
