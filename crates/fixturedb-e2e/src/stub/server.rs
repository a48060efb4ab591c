//! Connection handling and the statements the stub understands.
//!
//! State that a real engine keeps in its system tables lives in plain files
//! under `<datadir>/mysql/`, so it survives restarts and is carried along
//! when the data directory is copied into a template.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::trace;

use super::{STUB_TARGET, STUB_VERSION, append_line};
use crate::protocol::{Reply, Request};

/// Directory holding the stub's system tables.
pub const SYSTEM_DIR: &str = "mysql";
/// File holding the root password, once set.
pub const ROOT_PASSWORD_FILE: &str = "root.pw";
/// File holding the supervisor's state row.
pub const STATE_FILE: &str = "fixturedb_state";

/// What a statement did.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Done,
    Rows(Vec<String>),
    Shutdown,
}

/// Shared state of one running stub.
pub(super) struct Server {
    data_dir: Utf8PathBuf,
    general_log: Option<Utf8PathBuf>,
    connections: Mutex<HashMap<u64, TcpStream>>,
    next_id: AtomicU64,
    shutdown: Mutex<Sender<()>>,
}

impl Server {
    /// Accepts connections until a client issues `SHUTDOWN`.
    ///
    /// Returns whether the shutdown was requested in-protocol.
    pub(super) fn serve(
        listener: TcpListener,
        data_dir: Utf8PathBuf,
        general_log: Option<Utf8PathBuf>,
    ) -> bool {
        let (sender, receiver) = mpsc::channel();
        let server = Arc::new(Self {
            data_dir,
            general_log,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            shutdown: Mutex::new(sender),
        });

        let acceptor = Arc::clone(&server);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let server = Arc::clone(&acceptor);
                thread::spawn(move || server.handle(stream));
            }
        });

        // Returning ends the process, which drops every open connection.
        receiver.recv().is_ok()
    }

    fn system_file(&self, name: &str) -> Utf8PathBuf {
        self.data_dir.join(SYSTEM_DIR).join(name)
    }

    fn handle(&self, stream: TcpStream) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let Ok(registered) = stream.try_clone() else {
            return;
        };
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, registered);
        if let Err(error) = self.converse(id, stream) {
            trace!(target: STUB_TARGET, id, %error, "connection dropped");
        }
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    fn converse(&self, id: u64, stream: TcpStream) -> io::Result<()> {
        let mut writer = stream.try_clone()?;
        let mut reader = BufReader::new(stream);
        reply(&mut writer, &Reply::Ready(STUB_VERSION.to_owned()))?;

        let mut authenticated = false;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            let request = match Request::parse(&line) {
                Ok(request) => request,
                Err(error) => {
                    reply(&mut writer, &Reply::Err(error.to_string()))?;
                    continue;
                }
            };
            match request {
                Request::Auth { user, password } => match self.authenticate(&user, password.as_deref()) {
                    Ok(()) => {
                        authenticated = true;
                        reply(&mut writer, &Reply::Ok)?;
                    }
                    Err(message) => {
                        reply(&mut writer, &Reply::Err(message))?;
                        return Ok(());
                    }
                },
                Request::Exec(_) | Request::Query(_) if !authenticated => {
                    reply(&mut writer, &Reply::Err("not authenticated".to_owned()))?;
                }
                Request::Exec(statement) => match self.run(id, &statement) {
                    Ok(Outcome::Shutdown) => {
                        reply(&mut writer, &Reply::Ok)?;
                        self.request_shutdown();
                        return Ok(());
                    }
                    Ok(Outcome::Done | Outcome::Rows(_)) => reply(&mut writer, &Reply::Ok)?,
                    Err(message) => reply(&mut writer, &Reply::Err(message))?,
                },
                Request::Query(statement) => match self.run(id, &statement) {
                    Ok(Outcome::Rows(rows)) => {
                        for row in rows {
                            reply(&mut writer, &Reply::Row(row))?;
                        }
                        reply(&mut writer, &Reply::End)?;
                    }
                    Ok(Outcome::Done | Outcome::Shutdown) => reply(&mut writer, &Reply::End)?,
                    Err(message) => reply(&mut writer, &Reply::Err(message))?,
                },
            }
        }
    }

    fn authenticate(&self, user: &str, password: Option<&str>) -> Result<(), String> {
        if user != "root" {
            return Err(format!("Access denied for user '{user}'@'localhost'"));
        }
        let expected = fs::read_to_string(self.system_file(ROOT_PASSWORD_FILE)).ok();
        if expected.as_deref() == password {
            Ok(())
        } else {
            Err(format!(
                "Access denied for user '{user}'@'localhost' (using password: {})",
                if password.is_some() { "YES" } else { "NO" }
            ))
        }
    }

    fn request_shutdown(&self) {
        let sender = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.send(()).is_err() {
            trace!(target: STUB_TARGET, "shutdown already under way");
        }
    }

    fn run(&self, id: u64, statement: &str) -> Result<Outcome, String> {
        self.log_statement(id, statement);
        let upper = statement.trim().to_ascii_uppercase();

        if upper == "SHUTDOWN" {
            return Ok(Outcome::Shutdown);
        }
        if let Some(target) = upper.strip_prefix("KILL ") {
            return self.kill(target.trim());
        }
        if upper.starts_with("SELECT ID FROM INFORMATION_SCHEMA.PROCESSLIST") {
            let mut others: Vec<u64> = self
                .connections
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .copied()
                .filter(|other| *other != id)
                .collect();
            others.sort_unstable();
            return Ok(Outcome::Rows(
                others.into_iter().map(|other| other.to_string()).collect(),
            ));
        }
        if upper.contains("FIXTUREDB_STATE") {
            return self.state_table(&upper, statement);
        }
        if upper.starts_with("ALTER USER") {
            let password = literals(statement)
                .pop()
                .ok_or_else(|| "ALTER USER needs IDENTIFIED BY".to_owned())?;
            self.write_system_file(ROOT_PASSWORD_FILE, &password)?;
            return Ok(Outcome::Done);
        }
        if upper.starts_with("CREATE DATABASE") {
            let name = statement
                .split_whitespace()
                .last()
                .map(|word| word.trim_matches('`').replace("``", "`"))
                .ok_or_else(|| "CREATE DATABASE needs a name".to_owned())?;
            fs::create_dir_all(self.data_dir.join(name)).map_err(|error| error.to_string())?;
            return Ok(Outcome::Done);
        }
        if upper.starts_with("SELECT") {
            return Ok(Outcome::Rows(Vec::new()));
        }
        Ok(Outcome::Done)
    }

    fn state_table(&self, upper: &str, statement: &str) -> Result<Outcome, String> {
        if upper.starts_with("CREATE TABLE") {
            return Ok(Outcome::Done);
        }
        if upper.starts_with("REPLACE INTO") {
            let token = literals(statement)
                .pop()
                .ok_or_else(|| "REPLACE INTO needs a value".to_owned())?;
            self.write_system_file(STATE_FILE, &token)?;
            return Ok(Outcome::Done);
        }
        if upper.starts_with("DELETE FROM") {
            return match fs::remove_file(self.system_file(STATE_FILE)) {
                Ok(()) => Ok(Outcome::Done),
                Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Outcome::Done),
                Err(error) => Err(error.to_string()),
            };
        }
        if upper.starts_with("SELECT") {
            return match fs::read_to_string(self.system_file(STATE_FILE)) {
                Ok(token) => Ok(Outcome::Rows(vec![token])),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    Ok(Outcome::Rows(Vec::new()))
                }
                Err(error) => Err(error.to_string()),
            };
        }
        Err(format!("unsupported statement on state table: {statement}"))
    }

    fn kill(&self, target: &str) -> Result<Outcome, String> {
        let id: u64 = target
            .parse()
            .map_err(|_| format!("Unknown thread id: {target}"))?;
        let stream = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or_else(|| format!("Unknown thread id: {id}"))?;
        stream
            .shutdown(Shutdown::Both)
            .map_err(|error| error.to_string())?;
        Ok(Outcome::Done)
    }

    fn write_system_file(&self, name: &str, contents: &str) -> Result<(), String> {
        let dir = self.data_dir.join(SYSTEM_DIR);
        fs::create_dir_all(&dir).map_err(|error| error.to_string())?;
        fs::write(dir.join(name), contents).map_err(|error| error.to_string())
    }

    fn log_statement(&self, id: u64, statement: &str) {
        let Some(path) = &self.general_log else {
            return;
        };
        if let Err(error) = append_line(path, &format!("{id}\tQuery\t{statement}")) {
            trace!(target: STUB_TARGET, %path, %error, "general log unavailable");
        }
    }
}

fn reply(writer: &mut TcpStream, message: &Reply) -> io::Result<()> {
    writeln!(writer, "{}", message.encode())?;
    writer.flush()
}

/// Extracts every single-quoted literal from `statement`, undoing `''` and
/// backslash escapes.
#[must_use]
pub fn literals(statement: &str) -> Vec<String> {
    let mut found = Vec::new();
    let mut chars = statement.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\'' {
            continue;
        }
        let mut literal = String::new();
        while let Some(ch) = chars.next() {
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        literal.push(escaped);
                    }
                }
                '\'' if chars.peek() == Some(&'\'') => {
                    chars.next();
                    literal.push('\'');
                }
                '\'' => break,
                other => literal.push(other),
            }
        }
        found.push(literal);
    }
    found
}

/// Whether `dir` holds any entries. A missing directory is empty.
pub(super) fn is_populated(dir: &Utf8Path) -> bool {
    fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_undo_quoting() {
        assert_eq!(
            literals(r"ALTER USER 'root'@'localhost' IDENTIFIED BY 'it''s a\\b'"),
            vec!["root", "localhost", r"it's a\b"]
        );
    }

    #[test]
    fn identity_token_is_the_last_literal() {
        let statement = fixturedb::engine::statements::store_identity("0b7c");
        assert_eq!(literals(&statement).pop().as_deref(), Some("0b7c"));
    }
}
