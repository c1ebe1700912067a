//! Container runtime capability.
//!
//! The supervisor and the orchestrator only talk to containers through
//! [`ContainerRuntime`]. [`DockerRuntime`] is the production implementation.

mod docker;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::DockerRuntime;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::RuntimeError;

/// Output chunks from an attached container.
pub type OutputStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, RuntimeError>> + Send>>;

/// Host side of a port binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
}

/// Description of the container to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub working_dir: Option<String>,
    /// Container ports in `<port>/<proto>` form.
    pub exposed_ports: Vec<String>,
    pub env: Vec<String>,
    /// Bind mounts in `<host>:<container>` form.
    pub binds: Vec<String>,
    /// Keyed by container port in `<port>/<proto>` form.
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
    pub labels: HashMap<String, String>,
    pub tty: bool,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make `image` available locally, pulling it if needed.
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its runtime-assigned identifier.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Attach to the container's stderr. The stream ends when the container exits.
    async fn attach(&self, id: &str) -> Result<OutputStream, RuntimeError>;

    async fn kill(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    /// Whether the runtime still lists the container.
    async fn exists(&self, id: &str) -> Result<bool, RuntimeError>;
}
