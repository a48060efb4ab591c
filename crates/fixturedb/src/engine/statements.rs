//! Statement text sent to the engine.
//!
//! The identity row lives in a small key/value table inside the engine's
//! administrative schema, keyed by a reserved variable name.

/// Administrative schema selected before shutting the engine down.
pub const ADMIN_SCHEMA: &str = "mysql";

/// Table holding supervisor state inside the engine.
pub const STATE_TABLE: &str = "mysql.fixturedb_state";

/// Reserved variable name for the instance identity.
pub const IDENTITY_VARIABLE: &str = "instance_identity";

/// Account the supervisor administers the engine with.
pub const ROOT_USER: &str = "root";

/// Quotes a string literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Quotes an identifier.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Creates the state table when missing.
#[must_use]
pub fn ensure_state_table() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {STATE_TABLE} \
         (variable VARCHAR(64) NOT NULL PRIMARY KEY, value VARCHAR(255) NOT NULL)"
    )
}

/// Reads the stored identity.
#[must_use]
pub fn select_identity() -> String {
    format!(
        "SELECT value FROM {STATE_TABLE} WHERE variable = {}",
        quote_literal(IDENTITY_VARIABLE)
    )
}

/// Stores `token` as the identity, replacing any earlier value.
#[must_use]
pub fn store_identity(token: &str) -> String {
    format!(
        "REPLACE INTO {STATE_TABLE} (variable, value) VALUES ({}, {})",
        quote_literal(IDENTITY_VARIABLE),
        quote_literal(token)
    )
}

/// Deletes the stored identity.
#[must_use]
pub fn clear_identity() -> String {
    format!(
        "DELETE FROM {STATE_TABLE} WHERE variable = {}",
        quote_literal(IDENTITY_VARIABLE)
    )
}

/// Sets the root password for local connections.
#[must_use]
pub fn set_root_password(password: &str) -> String {
    format!(
        "ALTER USER {}@'localhost' IDENTIFIED BY {}",
        quote_literal(ROOT_USER),
        quote_literal(password)
    )
}

/// Creates a schema when missing.
#[must_use]
pub fn create_schema(name: &str) -> String {
    format!("CREATE DATABASE IF NOT EXISTS {}", quote_identifier(name))
}

/// Switches to the administrative schema.
#[must_use]
pub fn use_admin_schema() -> String {
    format!("USE {ADMIN_SCHEMA}")
}

/// Lists ids of every client connection except the caller's.
#[must_use]
pub fn list_other_connections() -> String {
    "SELECT id FROM information_schema.processlist WHERE id <> CONNECTION_ID()".to_owned()
}

/// Terminates one client connection.
#[must_use]
pub fn kill_connection(id: &str) -> String {
    format!("KILL {}", id.trim())
}

/// Asks the engine to shut down.
#[must_use]
pub fn shutdown() -> String {
    "SHUTDOWN".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_escape_quotes_and_backslashes() {
        assert_eq!(quote_literal(r"it's a\b"), r"'it''s a\\b'");
    }

    #[test]
    fn identifiers_escape_backticks() {
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn identity_statements_target_the_reserved_variable() {
        assert_eq!(
            select_identity(),
            "SELECT value FROM mysql.fixturedb_state WHERE variable = 'instance_identity'"
        );
        assert!(store_identity("abc").ends_with("VALUES ('instance_identity', 'abc')"));
        assert!(clear_identity().starts_with("DELETE FROM mysql.fixturedb_state"));
    }
}
