//! ddbl - ephemeral DynamoDB Local instances for tests.
//!
//! Each instance is a Docker container owned by a dedicated supervisor
//! process. The caller gets a [`LifecycleHandle`] once the service answers
//! application requests, and `stop()` on it removes the container, the
//! supervisor and the temporary directory.
//!
//! ## Architecture
//!
//! - **Workspace**: per-instance `run-<unique>/{data,logs}` tree
//! - **Supervisor**: child process owning one container, tearing it down on
//!   stop message, SIGINT or SIGTERM
//! - **Orchestrator**: spawns the supervisor and runs the readiness race
//! - **Runtime**: container capability, backed by Docker

pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod runtime;
pub mod supervisor;
pub mod workspace;

pub use error::{LaunchError, TeardownError};
pub use orchestrator::{InstanceState, LifecycleHandle, Orchestrator};
pub use protocol::LaunchConfig;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::runtime::DockerRuntime;

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 8000;

/// How to start a supervisor process. The supervisor command token and the
/// JSON launch config are appended after `args`.
#[derive(Debug, Clone)]
pub struct SupervisorCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SupervisorCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl Default for SupervisorCommand {
    /// The `ddbl` binary found on `PATH`.
    fn default() -> Self {
        Self::new("ddbl")
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Parent of all per-instance workspaces.
    pub temp_root: PathBuf,
    pub port: u16,
    /// Engine options passed as `key=value` environment entries.
    pub options: Vec<String>,
    pub image: String,
    /// Total time the port may take to open.
    pub readiness_timeout: Duration,
    pub poll_interval: Duration,
    pub supervisor: SupervisorCommand,
}

impl Config {
    /// Defaults for `port`, including the matching `http.port` option.
    pub fn for_port(port: u16) -> Self {
        Self {
            temp_root: std::env::temp_dir().join("ddbl"),
            port,
            options: vec![
                format!("http.port={port}"),
                "discovery.type=single-node".to_string(),
            ],
            image: supervisor::DEFAULT_IMAGE.to_string(),
            readiness_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(100),
            supervisor: SupervisorCommand::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_port(DEFAULT_PORT)
    }
}

/// Launch an instance against the local Docker daemon.
pub async fn launch(config: Config) -> Result<LifecycleHandle, LaunchError> {
    let runtime = Arc::new(DockerRuntime::connect()?);
    Orchestrator::new(config, runtime).launch().await
}
