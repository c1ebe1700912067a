//! Caller-facing handle for one running instance.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::process::SupervisorProcess;
use crate::error::{RuntimeError, TeardownError};
use crate::runtime::ContainerRuntime;
use crate::workspace::Workspace;

/// Lifecycle of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Launching,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// One running DynamoDB Local instance. Call [`LifecycleHandle::stop`] to
/// tear it down; dropping an unstopped handle falls back to signalling the
/// supervisor and removing the workspace.
pub struct LifecycleHandle {
    url: String,
    port: u16,
    workspace: Workspace,
    process: SupervisorProcess,
    runtime: Arc<dyn ContainerRuntime>,
    state: InstanceState,
    /// Set once a teardown ran with no failures.
    torn_down: bool,
}

impl LifecycleHandle {
    pub(crate) fn new(
        port: u16,
        workspace: Workspace,
        process: SupervisorProcess,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            url: format!("http://localhost:{port}"),
            port,
            workspace,
            process,
            runtime,
            state: InstanceState::Launching,
            torn_down: false,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn data_dir(&self) -> &Path {
        self.workspace.data_dir()
    }

    pub fn logs_dir(&self) -> &Path {
        self.workspace.logs_dir()
    }

    pub fn workspace_path(&self) -> &Path {
        self.workspace.path()
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Identifier of the container, once the supervisor reported it.
    ///
    /// Takes `&mut self` because supervisor messages that arrived since the
    /// last call are consumed from the process channel first.
    pub fn container_id(&mut self) -> Option<String> {
        self.process.container_id().map(str::to_string)
    }

    pub(crate) fn process_mut(&mut self) -> &mut SupervisorProcess {
        &mut self.process
    }

    pub(crate) fn mark_ready(&mut self) {
        self.state = InstanceState::Ready;
    }

    /// Tear the instance down: stop the supervisor, wait for it to exit,
    /// remove the container, remove the workspace.
    ///
    /// Every step runs even if an earlier one failed; failures are reported
    /// together afterwards. Calling `stop` on a stopped instance is a no-op.
    pub async fn stop(&mut self) -> Result<(), TeardownError> {
        if self.state == InstanceState::Stopped {
            debug!(port = self.port, "Instance already stopped");
            return Ok(());
        }

        info!(port = self.port, "Stopping instance");
        self.state = InstanceState::Stopping;
        let result = self.teardown().await;
        self.state = if result.is_ok() {
            InstanceState::Stopped
        } else {
            InstanceState::Failed
        };
        result
    }

    /// Teardown after a failed launch. Leaves the handle in `Failed`.
    pub(crate) async fn abort(&mut self) {
        if let Err(e) = self.teardown().await {
            error!(port = self.port, error = %e, "Cleanup after failed launch incomplete");
        }
        self.state = InstanceState::Failed;
    }

    async fn teardown(&mut self) -> Result<(), TeardownError> {
        let mut failures = Vec::new();

        let container_id = self.process.kill().await;

        if let Err(e) = self.process.wait_until_stopped().await {
            error!(error = %e, "Failed to wait for supervisor");
            failures.push(format!("wait for supervisor: {e}"));
        }

        match container_id {
            Some(id) => {
                info!(container_id = %id, "Removing container");
                match self.runtime.remove(&id).await {
                    Ok(()) => {}
                    Err(RuntimeError::NotFound(_)) => {
                        debug!(container_id = %id, "Container already removed by supervisor");
                    }
                    Err(e) => {
                        error!(container_id = %id, error = %e, "Failed to remove container");
                        failures.push(format!("remove container {id}: {e}"));
                    }
                }
            }
            None => debug!("Supervisor never reported a container"),
        }

        info!(path = %self.workspace.path().display(), "Removing temporary directory");
        if let Err(e) = self.workspace.cleanup().await {
            error!(error = %e, "Failed to remove workspace");
            failures.push(e.to_string());
        }

        if failures.is_empty() {
            self.torn_down = true;
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}

impl Drop for LifecycleHandle {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        warn!(
            port = self.port,
            state = ?self.state,
            "Instance dropped without stop(), signalling supervisor; workspace removal may race its container teardown"
        );
        self.process.signal_terminate();
        self.workspace.cleanup_blocking();
    }
}

impl fmt::Debug for LifecycleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleHandle")
            .field("url", &self.url)
            .field("workspace", &self.workspace.path())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
