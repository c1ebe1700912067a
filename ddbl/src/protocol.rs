//! Messages exchanged between the orchestrator and the supervisor process.
//!
//! The launch configuration travels once as a spawn argument. After that the
//! orchestrator writes [`ControlMessage`]s to the supervisor's stdin and the
//! supervisor answers with [`SupervisorMessage`]s on its stdout, one JSON
//! object per line.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;

/// First positional argument that makes the binary run as a supervisor.
pub const SUPERVISOR_COMMAND: &str = "launch-ddb-local-docker-subprocess";

/// Everything the supervisor needs to create its container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    /// Engine options injected as `key=value` environment entries.
    pub options: Vec<String>,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub port: u16,
    /// Image override; the pinned image is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl LaunchConfig {
    pub fn to_arg(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_arg(arg: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(arg).map_err(|source| ProtocolError::Decode {
            line: arg.to_string(),
            source,
        })
    }
}

/// Orchestrator to supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlMessage {
    Stop,
}

/// Supervisor to orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorMessage {
    /// The container exists; sent before it is started.
    Created { container_id: String },
    /// Acknowledges a stop: the container was killed and removed.
    Stopped { container_id: String },
    /// The container ended without being asked to.
    Exited { container_id: String },
}

impl SupervisorMessage {
    pub fn container_id(&self) -> &str {
        match self {
            SupervisorMessage::Created { container_id }
            | SupervisorMessage::Stopped { container_id }
            | SupervisorMessage::Exited { container_id } => container_id,
        }
    }
}

/// Write one message followed by a newline and flush.
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let mut line = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read the next message. Returns `Ok(None)` on EOF; blank lines are skipped.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
    M: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|source| ProtocolError::Decode {
                line: trimmed.to_string(),
                source,
            });
    }
}
