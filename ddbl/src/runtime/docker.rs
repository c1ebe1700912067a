//! Docker Engine implementation of [`ContainerRuntime`] via bollard.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding as DockerPortBinding};
use futures_util::{StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{ContainerRuntime, ContainerSpec, OutputStream};
use crate::error::RuntimeError;

/// Talks to the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform default socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }
}

fn is_status(e: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let port_bindings = spec
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bindings = bindings
                .iter()
                .map(|b| DockerPortBinding {
                    host_ip: Some(b.host_ip.clone()),
                    host_port: Some(b.host_port.to_string()),
                })
                .collect();
            (port.clone(), Some(bindings))
        })
        .collect();

    Config {
        image: Some(spec.image.clone()),
        cmd: Some(spec.cmd.clone()),
        working_dir: spec.working_dir.clone(),
        exposed_ports: Some(exposed_ports),
        env: Some(spec.env.clone()),
        labels: Some(spec.labels.clone()),
        tty: Some(spec.tty),
        open_stdin: Some(spec.tty),
        attach_stderr: Some(true),
        host_config: Some(HostConfig {
            binds: Some(spec.binds.clone()),
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!(image = %image, "Image present");
                return Ok(());
            }
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(e.into()),
        }

        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|_| async { Ok(()) })
            .await?;
        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config(spec))
            .await?;
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_not_found(e, id))
    }

    async fn attach(&self, id: &str) -> Result<OutputStream, RuntimeError> {
        let options = AttachContainerOptions::<String> {
            stream: Some(true),
            stderr: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { output, .. } = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| map_not_found(e, id))?;

        Ok(Box::pin(output.map(|chunk| {
            chunk
                .map(|log| log.into_bytes().to_vec())
                .map_err(RuntimeError::from)
        })))
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // 409: the container is not running any more
            Err(e) if is_status(&e, 409) => {
                debug!(container_id = %id, "Container already stopped");
                Ok(())
            }
            Err(e) => Err(map_not_found(e, id)),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_not_found(e, id))
    }

    async fn exists(&self, id: &str) -> Result<bool, RuntimeError> {
        match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn map_not_found(e: bollard::errors::Error, id: &str) -> RuntimeError {
    if is_status(&e, 404) {
        RuntimeError::NotFound(id.to_string())
    } else {
        e.into()
    }
}
