//! [`Connector`] for instances served by `stub-mysqld`.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use fixturedb::{ConnectTarget, Connector, Session, SessionError};
use tracing::trace;

use crate::protocol::{Reply, Request};

const CONNECTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connector");

/// Opens line-protocol sessions over TCP.
#[derive(Debug, Clone, Copy)]
pub struct StubConnector {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for StubConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_secs(2),
        }
    }
}

impl StubConnector {
    /// Builds a connector with the default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds how long a reply may take, including the greeting.
    ///
    /// A listener that accepts but never greets is reported as unreachable
    /// once this elapses.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn address(target: &ConnectTarget) -> io::Result<SocketAddr> {
        (target.host.as_str(), target.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))
    }

    fn handshake(&self, target: &ConnectTarget) -> Result<StubSession, String> {
        let address = Self::address(target).map_err(|error| error.to_string())?;
        let stream = TcpStream::connect_timeout(&address, self.connect_timeout)
            .map_err(|error| error.to_string())?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|error| error.to_string())?;
        let mut session = StubSession::new(stream).map_err(|error| error.to_string())?;

        match session.receive().map_err(|error| error.to_string())? {
            Reply::Ready(version) => {
                trace!(target: CONNECTOR_TARGET, %address, %version, "greeted");
            }
            other => return Err(format!("unexpected greeting {}", other.encode())),
        }
        session
            .send(&Request::Auth {
                user: target.user.clone(),
                password: target.password.clone(),
            })
            .map_err(|error| error.to_string())?;
        match session.receive().map_err(|error| error.to_string())? {
            Reply::Ok => Ok(session),
            Reply::Err(message) => Err(message),
            other => Err(format!("unexpected reply {}", other.encode())),
        }
    }
}

impl Connector for StubConnector {
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>, SessionError> {
        self.handshake(target)
            .map(|session| Box::new(session) as Box<dyn Session>)
            .map_err(|message| SessionError::Connect {
                target: target.to_string(),
                message,
            })
    }
}

/// One authenticated connection.
#[derive(Debug)]
pub struct StubSession {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl StubSession {
    fn new(stream: TcpStream) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn send(&mut self, request: &Request) -> io::Result<()> {
        writeln!(self.writer, "{}", request.encode())?;
        self.writer.flush()
    }

    fn receive(&mut self) -> io::Result<Reply> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            ));
        }
        Reply::parse(&line).map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
    }

    fn rows(&mut self, statement: &str) -> Result<Vec<String>, SessionError> {
        self.send(&Request::Query(statement.to_owned()))?;
        let mut rows = Vec::new();
        loop {
            match self.receive()? {
                Reply::Row(value) => rows.push(value),
                Reply::End => return Ok(rows),
                Reply::Err(message) => {
                    return Err(SessionError::Statement {
                        statement: statement.to_owned(),
                        message,
                    });
                }
                other => {
                    return Err(SessionError::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unexpected reply {}", other.encode()),
                    )));
                }
            }
        }
    }
}

impl Session for StubSession {
    fn execute(&mut self, statement: &str) -> Result<(), SessionError> {
        self.send(&Request::Exec(statement.to_owned()))?;
        match self.receive()? {
            Reply::Ok => Ok(()),
            Reply::Err(message) => Err(SessionError::Statement {
                statement: statement.to_owned(),
                message,
            }),
            other => Err(SessionError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected reply {}", other.encode()),
            ))),
        }
    }

    fn query_scalar(&mut self, statement: &str) -> Result<Option<String>, SessionError> {
        Ok(self.rows(statement)?.into_iter().next())
    }

    fn query_column(&mut self, statement: &str) -> Result<Vec<String>, SessionError> {
        self.rows(statement)
    }
}
