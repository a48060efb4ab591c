//! Line protocol spoken between [`crate::StubConnector`] and `stub-mysqld`.
//!
//! Every message is one line. The server greets with `READY <version>`, the
//! client authenticates with `AUTH <user> [password]`, then sends `EXEC` or
//! `QUERY` requests. `EXEC` is answered with `OK` or `ERR <message>`;
//! `QUERY` with zero or more `ROW <value>` lines followed by `END`.

use thiserror::Error;

/// Errors raised while decoding a protocol line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line did not start with a known verb.
    #[error("unknown message '{line}'")]
    Unknown {
        /// Offending line.
        line: String,
    },
    /// The verb was recognised but its payload was missing.
    #[error("message '{verb}' is missing its payload")]
    MissingPayload {
        /// Verb that needs a payload.
        verb: &'static str,
    },
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Authenticates the connection.
    Auth {
        /// Account name.
        user: String,
        /// Password, if any.
        password: Option<String>,
    },
    /// Runs a statement that returns no rows.
    Exec(String),
    /// Runs a statement and streams back its first column.
    Query(String),
}

impl Request {
    /// Renders the request as one line, without the trailing newline.
    ///
    /// Embedded line breaks in statements are folded into spaces.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Auth {
                user,
                password: Some(password),
            } => format!("AUTH {user} {password}"),
            Self::Auth {
                user,
                password: None,
            } => format!("AUTH {user}"),
            Self::Exec(statement) => format!("EXEC {}", fold(statement)),
            Self::Query(statement) => format!("QUERY {}", fold(statement)),
        }
    }

    /// Parses one request line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let (verb, payload) = split_verb(line);
        match verb {
            "AUTH" => {
                let payload = payload.ok_or(ProtocolError::MissingPayload { verb: "AUTH" })?;
                let (user, password) = match payload.split_once(' ') {
                    Some((user, password)) => (user, Some(password.to_owned())),
                    None => (payload, None),
                };
                Ok(Self::Auth {
                    user: user.to_owned(),
                    password,
                })
            }
            "EXEC" => payload
                .map(|statement| Self::Exec(statement.to_owned()))
                .ok_or(ProtocolError::MissingPayload { verb: "EXEC" }),
            "QUERY" => payload
                .map(|statement| Self::Query(statement.to_owned()))
                .ok_or(ProtocolError::MissingPayload { verb: "QUERY" }),
            _ => Err(ProtocolError::Unknown {
                line: line.to_owned(),
            }),
        }
    }
}

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Greeting carrying the server version.
    Ready(String),
    /// Request succeeded.
    Ok,
    /// Request failed.
    Err(String),
    /// One result row.
    Row(String),
    /// End of a result set.
    End,
}

impl Reply {
    /// Renders the reply as one line, without the trailing newline.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Ready(version) => format!("READY {version}"),
            Self::Ok => "OK".to_owned(),
            Self::Err(message) => format!("ERR {}", fold(message)),
            Self::Row(value) => format!("ROW {}", fold(value)),
            Self::End => "END".to_owned(),
        }
    }

    /// Parses one reply line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        match split_verb(line) {
            ("READY", version) => Ok(Self::Ready(version.unwrap_or_default().to_owned())),
            ("OK", None) => Ok(Self::Ok),
            ("ERR", message) => Ok(Self::Err(message.unwrap_or_default().to_owned())),
            ("ROW", value) => Ok(Self::Row(value.unwrap_or_default().to_owned())),
            ("END", None) => Ok(Self::End),
            _ => Err(ProtocolError::Unknown {
                line: line.to_owned(),
            }),
        }
    }
}

fn split_verb(line: &str) -> (&str, Option<&str>) {
    match line.split_once(' ') {
        Some((verb, payload)) => (verb, Some(payload)),
        None => (line, None),
    }
}

fn fold(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("AUTH root", Request::Auth { user: "root".to_owned(), password: None })]
    #[case("AUTH root s3cret pass", Request::Auth {
        user: "root".to_owned(),
        password: Some("s3cret pass".to_owned()),
    })]
    #[case("QUERY SELECT 1\n", Request::Query("SELECT 1".to_owned()))]
    fn parses_requests(#[case] line: &str, #[case] expected: Request) {
        assert_eq!(Request::parse(line), Ok(expected));
    }

    #[test]
    fn statements_are_folded_onto_one_line() {
        let request = Request::Exec("CREATE TABLE t (\n  id INT\n)".to_owned());
        assert_eq!(request.encode(), "EXEC CREATE TABLE t (   id INT )");
    }

    #[test]
    fn rejects_unknown_verbs_and_missing_payloads() {
        assert!(matches!(
            Request::parse("HELLO"),
            Err(ProtocolError::Unknown { .. })
        ));
        assert_eq!(
            Request::parse("EXEC"),
            Err(ProtocolError::MissingPayload { verb: "EXEC" })
        );
        assert!(Reply::parse("OK extra").is_err());
    }

    #[test]
    fn replies_keep_their_payload() {
        assert_eq!(
            Reply::parse("ERR access denied for 'root'"),
            Ok(Reply::Err("access denied for 'root'".to_owned()))
        );
        assert_eq!(Reply::parse("ROW 42"), Ok(Reply::Row("42".to_owned())));
        assert_eq!(Reply::parse("END"), Ok(Reply::End));
    }
}
