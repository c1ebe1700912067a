//! Container spec for a DynamoDB Local instance.

use std::collections::HashMap;

use crate::protocol::LaunchConfig;
use crate::runtime::{ContainerSpec, PortBinding};

/// Pinned image used when the launch config does not override it.
pub const DEFAULT_IMAGE: &str = "amazon/dynamodb-local:2.5.2";

const WORKING_DIR: &str = "/home/dynamodblocal";
const CONTAINER_DATA_DIR: &str = "/home/dynamodblocal/data";
const WORKSPACE_LABEL: &str = "ddbl.workspace";

/// Build the container spec for `config`.
///
/// The service listens on `config.port` inside the container and is published
/// on the same host port.
pub fn container_spec(config: &LaunchConfig, image: &str) -> ContainerSpec {
    let port_key = format!("{}/tcp", config.port);

    let cmd = [
        "-jar",
        "DynamoDBLocal.jar",
        "-sharedDb",
        "-dbPath",
        CONTAINER_DATA_DIR,
        "-port",
    ]
    .iter()
    .map(|s| s.to_string())
    .chain(std::iter::once(config.port.to_string()))
    .collect();

    let mut env = config.options.clone();
    env.push("path.data=/var/lib/ddb-local".to_string());
    env.push("path.logs=/var/log/ddb-local".to_string());

    ContainerSpec {
        image: image.to_string(),
        cmd,
        working_dir: Some(WORKING_DIR.to_string()),
        exposed_ports: vec![port_key.clone()],
        env,
        binds: vec![format!(
            "{}:{}",
            config.data_dir.display(),
            CONTAINER_DATA_DIR
        )],
        port_bindings: HashMap::from([(
            port_key,
            vec![PortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: config.port,
            }],
        )]),
        labels: HashMap::from([(
            WORKSPACE_LABEL.to_string(),
            config.data_dir.display().to_string(),
        )]),
        tty: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(port: u16) -> LaunchConfig {
        LaunchConfig {
            options: vec![format!("http.port={port}"), "discovery.type=single-node".into()],
            data_dir: PathBuf::from("/tmp/ddbl/run-abc/data"),
            logs_dir: PathBuf::from("/tmp/ddbl/run-abc/logs"),
            port,
            image: None,
        }
    }

    #[test]
    fn publishes_service_port_on_same_host_port() {
        let spec = container_spec(&config(8123), DEFAULT_IMAGE);

        assert_eq!(spec.exposed_ports, vec!["8123/tcp".to_string()]);
        let binding = &spec.port_bindings["8123/tcp"][0];
        assert_eq!(binding.host_port, 8123);
        assert_eq!(spec.cmd.last().map(String::as_str), Some("8123"));
    }

    #[test]
    fn mounts_data_dir_and_injects_options() {
        let spec = container_spec(&config(8000), DEFAULT_IMAGE);

        assert_eq!(
            spec.binds,
            vec!["/tmp/ddbl/run-abc/data:/home/dynamodblocal/data".to_string()]
        );
        assert_eq!(&spec.env[..2], &["http.port=8000", "discovery.type=single-node"]);
        assert!(spec.env.contains(&"path.data=/var/lib/ddb-local".to_string()));
        assert!(spec.tty);
        assert_eq!(spec.image, DEFAULT_IMAGE);
        assert_eq!(spec.working_dir.as_deref(), Some("/home/dynamodblocal"));
    }
}
