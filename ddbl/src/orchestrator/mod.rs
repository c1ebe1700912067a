//! Orchestrator - launches a supervised instance and waits until it is ready.
//!
//! Launch order: workspace, supervisor process, port reachable, `ListTables`
//! answered. A handle is only returned after the service answered.

mod handle;
mod process;
mod readiness;

pub use handle::{InstanceState, LifecycleHandle};
pub use process::SupervisorProcess;
pub use readiness::{ListTablesProbe, ReadinessOutcome, race_port, race_service};

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::Config;
use crate::error::{LaunchError, Result};
use crate::protocol::LaunchConfig;
use crate::runtime::ContainerRuntime;
use crate::workspace::Workspace;

pub struct Orchestrator {
    config: Config,
    runtime: Arc<dyn ContainerRuntime>,
}

impl Orchestrator {
    /// `runtime` is used for the final container removal on teardown; the
    /// supervisor process talks to its own runtime connection.
    pub fn new(config: Config, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { config, runtime }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Launch one instance.
    ///
    /// If the supervisor exits before the service answers this fails with
    /// [`LaunchError::UnexpectedTermination`]; if the service does not answer within
    /// the readiness budget it fails with
    /// [`LaunchError::ReadinessTimeout`], which hands the live instance back.
    pub async fn launch(&self) -> Result<LifecycleHandle> {
        let port = self.config.port;

        info!(temp_root = %self.config.temp_root.display(), "Creating workspace");
        let workspace = Workspace::create(&self.config.temp_root).await?;

        let launch_config = LaunchConfig {
            options: self.config.options.clone(),
            data_dir: workspace.data_dir().to_path_buf(),
            logs_dir: workspace.logs_dir().to_path_buf(),
            port,
            image: Some(self.config.image.clone()),
        };

        info!(port, image = %self.config.image, "Launching supervisor");
        let process = match SupervisorProcess::spawn(&self.config.supervisor, &launch_config) {
            Ok(process) => process,
            Err(e) => {
                if let Err(cleanup) = workspace.cleanup().await {
                    warn!(error = %cleanup, "Failed to remove workspace after spawn failure");
                }
                return Err(e);
            }
        };
        let mut handle = LifecycleHandle::new(port, workspace, process, self.runtime.clone());

        let probe = ListTablesProbe::new(handle.url());
        let outcome = race_service(
            port,
            self.config.readiness_timeout,
            self.config.poll_interval,
            &probe,
            handle.process_mut().exited(),
        )
        .await;

        match outcome {
            ReadinessOutcome::Ready => {}
            ReadinessOutcome::Rejected(e) => {
                error!(port, error = %e, "Sanity probe failed");
                handle.abort().await;
                return Err(e.into());
            }
            ReadinessOutcome::ProcessExited(status) => {
                error!(port, status = ?status, "Instance terminated before becoming reachable");
                handle.abort().await;
                return Err(LaunchError::UnexpectedTermination { status });
            }
            ReadinessOutcome::Timeout => {
                warn!(port, waited = ?self.config.readiness_timeout, "Instance not reachable in time");
                return Err(LaunchError::ReadinessTimeout {
                    port,
                    waited: self.config.readiness_timeout,
                    instance: Box::new(handle),
                });
            }
        }

        handle.mark_ready();
        let container_id = handle.container_id();
        info!(url = %handle.url(), container_id = ?container_id, "Instance ready");
        Ok(handle)
    }
}
