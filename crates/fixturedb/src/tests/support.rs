//! Test doubles for the session seam and a scriptable stand-in engine.

use std::fs;
use std::sync::{Arc, Mutex, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use mockall::mock;

use crate::engine::statements;
use crate::session::{ConnectTarget, Connector, Session, SessionError};

mock! {
    pub EngineSession {}

    impl Session for EngineSession {
        fn execute(&mut self, statement: &str) -> Result<(), SessionError>;
        fn query_scalar(&mut self, statement: &str) -> Result<Option<String>, SessionError>;
        fn query_column(&mut self, statement: &str) -> Result<Vec<String>, SessionError>;
    }
}

/// State of an engine as seen through [`MemoryConnector`] sessions.
#[derive(Debug, Default)]
pub(crate) struct MemoryEngine {
    identity: Mutex<Option<String>>,
    statements: Mutex<Vec<String>>,
    rejected: Mutex<Option<String>>,
}

impl MemoryEngine {
    pub(crate) fn with_identity(token: &str) -> Arc<Self> {
        let engine = Self::default();
        *engine.identity.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_owned());
        Arc::new(engine)
    }

    /// Rejects every statement starting with `prefix` until
    /// [`Self::accept_all`].
    pub(crate) fn rejecting(prefix: &str) -> Arc<Self> {
        let engine = Self::default();
        *engine.rejected.lock().unwrap_or_else(PoisonError::into_inner) = Some(prefix.to_owned());
        Arc::new(engine)
    }

    pub(crate) fn accept_all(&self) {
        *self.rejected.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub(crate) fn identity(&self) -> Option<String> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.statements()
            .iter()
            .filter(|statement| statement.starts_with(prefix))
            .count()
    }
}

/// Connector that either refuses every connection or hands out sessions
/// backed by a shared [`MemoryEngine`].
pub(crate) struct MemoryConnector {
    engine: Arc<MemoryEngine>,
    reachable: bool,
}

impl MemoryConnector {
    pub(crate) fn reachable(engine: Arc<MemoryEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            reachable: true,
        })
    }

    pub(crate) fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::default(),
            reachable: false,
        })
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn Session>, SessionError> {
        if !self.reachable {
            return Err(SessionError::Connect {
                target: target.to_string(),
                message: "connection refused".to_owned(),
            });
        }
        Ok(Box::new(MemorySession {
            engine: Arc::clone(&self.engine),
        }))
    }
}

struct MemorySession {
    engine: Arc<MemoryEngine>,
}

impl Session for MemorySession {
    fn execute(&mut self, statement: &str) -> Result<(), SessionError> {
        self.engine
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(statement.to_owned());
        let rejected = self
            .engine
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if rejected.is_some_and(|prefix| statement.starts_with(&prefix)) {
            return Err(SessionError::Statement {
                statement: statement.to_owned(),
                message: "Table 'widgets' already exists".to_owned(),
            });
        }
        let mut identity = self
            .engine
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if statement.starts_with("REPLACE INTO") {
            *identity = statement.split('\'').rev().nth(1).map(str::to_owned);
        } else if statement == statements::clear_identity() {
            *identity = None;
        }
        Ok(())
    }

    fn query_scalar(&mut self, statement: &str) -> Result<Option<String>, SessionError> {
        if statement == statements::select_identity() {
            return Ok(self.engine.identity());
        }
        Ok(None)
    }

    fn query_column(&mut self, _statement: &str) -> Result<Vec<String>, SessionError> {
        Ok(Vec::new())
    }
}

/// How the scripted engine behaves once launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptedBehaviour {
    /// Stays up until killed.
    Serve,
    /// Reports a bind failure and exits.
    BindFailure,
    /// Reports a bind failure but keeps running.
    BindFailureHang,
}

/// Writes a shell script that answers `--version`, creates the data
/// directory on `--initialize-insecure` and otherwise behaves as requested.
#[cfg(unix)]
pub(crate) fn scripted_engine(dir: &Utf8Path, behaviour: ScriptedBehaviour) -> Utf8PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let run = match behaviour {
        ScriptedBehaviour::Serve => "exec sleep 60",
        ScriptedBehaviour::BindFailure => {
            "echo \"[ERROR] Can't start server: Bind on TCP/IP port: Address already in use\" >&2\nexit 1"
        }
        ScriptedBehaviour::BindFailureHang => {
            "echo \"[ERROR] Do you already have another mysqld server running on port: $port ?\" >&2\nexec sleep 60"
        }
    };
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"--version\" ]; then\n\
         echo \"mysqld  Ver 8.0.36 for Linux on x86_64 (scripted)\"\n\
         exit 0\n\
         fi\n\
         init=\n\
         for arg in \"$@\"; do\n\
         case \"$arg\" in\n\
         --initialize-insecure) init=1 ;;\n\
         --datadir=*) datadir=\"${{arg#--datadir=}}\" ;;\n\
         --port=*) port=\"${{arg#--port=}}\" ;;\n\
         esac\n\
         done\n\
         if [ -n \"$init\" ]; then\n\
         mkdir -p \"$datadir\" && : > \"$datadir/ibdata1\"\n\
         exit 0\n\
         fi\n\
         {run}\n"
    );
    let path = dir.join("mysqld");
    fs::write(&path, script).expect("write scripted engine");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
        .expect("make scripted engine executable");
    path
}
