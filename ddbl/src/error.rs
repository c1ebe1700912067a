//! Error types for ddbl.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::orchestrator::LifecycleHandle;

/// Temporary workspace creation and removal errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace directory {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to remove workspace directory {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

/// Container runtime errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),
    #[error("container runtime error: {0}")]
    Api(String),
}

impl From<bollard::errors::Error> for RuntimeError {
    fn from(e: bollard::errors::Error) -> Self {
        RuntimeError::Api(e.to_string())
    }
}

/// Errors on the line protocol between orchestrator and supervisor.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed message {line:?}: {source}")]
    Decode {
        line: String,
        source: serde_json::Error,
    },
    #[error("protocol I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Application-level sanity probe errors.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("probe returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("malformed probe response {body:?}: {source}")]
    Malformed {
        body: String,
        source: serde_json::Error,
    },
}

impl ProbeError {
    /// True when the request never got an HTTP answer, e.g. the connection
    /// was refused or dropped before a response arrived.
    pub fn is_unreachable(&self) -> bool {
        match self {
            ProbeError::Request(e) => e.is_connect() || e.is_request() || e.is_body(),
            ProbeError::Status { .. } | ProbeError::Malformed { .. } => false,
        }
    }
}

/// Errors returned by [`crate::Orchestrator::launch`].
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error("failed to spawn supervisor: {0}")]
    Spawn(#[source] io::Error),
    #[error("instance terminated unexpectedly ({status:?})")]
    UnexpectedTermination { status: Option<ExitStatus> },
    /// The supervisor is still alive; the caller owns `instance` and decides
    /// whether to keep it or stop it.
    #[error("port {port} not reachable after {waited:?}")]
    ReadinessTimeout {
        port: u16,
        waited: Duration,
        instance: Box<LifecycleHandle>,
    },
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Failures collected while tearing down an instance.
#[derive(Debug, Error)]
#[error("teardown incomplete: {}", .failures.join("; "))]
pub struct TeardownError {
    pub failures: Vec<String>,
}

/// Errors that end the supervisor process with a non-zero status.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("supervisor I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("container {container_id} exited on its own")]
    ContainerExited { container_id: String },
}

pub type Result<T, E = LaunchError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_termination_is_distinct_from_timeout() {
        let err = LaunchError::UnexpectedTermination { status: None };
        assert!(err.to_string().contains("terminated unexpectedly"));
        assert!(!err.to_string().contains("not reachable"));
    }

    #[test]
    fn teardown_error_lists_every_failure() {
        let err = TeardownError {
            failures: vec!["remove container: boom".into(), "remove dir: nope".into()],
        };
        assert_eq!(
            err.to_string(),
            "teardown incomplete: remove container: boom; remove dir: nope"
        );
    }
}
