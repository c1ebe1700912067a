//! Test helpers for ddbl integration tests.
//!
//! The supervisor is replaced by a small `sh` script speaking the line
//! protocol, the container runtime by a recorder, and the service by a
//! minimal HTTP responder, so these tests need no Docker daemon.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ddbl::error::RuntimeError;
use ddbl::runtime::{ContainerRuntime, ContainerSpec, OutputStream};
use ddbl::{Config, SupervisorCommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Reports a container, then stays alive until told to stop.
pub const LIVE_SUPERVISOR: &str = r#"
[ "$1" = "launch-ddb-local-docker-subprocess" ] || exit 9
echo '{"event":"created","container_id":"fake-1"}'
while read -r line; do
  case "$line" in
    *stop*) echo '{"event":"stopped","container_id":"fake-1"}'; exit 0 ;;
  esac
done
"#;

/// Dies before anything is created.
pub const CRASHING_SUPERVISOR: &str = "exit 3";

/// Creates a container, then dies.
pub const CRASH_AFTER_CREATE_SUPERVISOR: &str = r#"
echo '{"event":"created","container_id":"fake-1"}'
exit 1
"#;

/// Reports a container, then later reports that it exited on its own.
pub const EXITING_AFTER_READY_SUPERVISOR: &str = r#"
echo '{"event":"created","container_id":"fake-1"}'
sleep 1
echo '{"event":"exited","container_id":"fake-1"}'
exit 1
"#;

/// Run `script` through `sh -c` as the supervisor.
pub fn fake_supervisor(script: &str) -> SupervisorCommand {
    SupervisorCommand::new("sh")
        .arg("-c")
        .arg(script)
        .arg("fake-supervisor")
}

/// Config with short timeouts suitable for tests.
pub fn test_config(temp_root: &Path, port: u16, supervisor: SupervisorCommand) -> Config {
    let mut config = Config::for_port(port);
    config.temp_root = temp_root.to_path_buf();
    config.readiness_timeout = Duration::from_secs(10);
    config.poll_interval = Duration::from_millis(20);
    config.supervisor = supervisor;
    config
}

/// A port nothing listens on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Entries left under `dir`.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Container runtime that only tracks which containers exist.
#[derive(Default)]
pub struct RecordingRuntime {
    live: Mutex<HashSet<String>>,
    removed: Mutex<Vec<String>>,
}

impl RecordingRuntime {
    pub fn with_container(id: &str) -> Self {
        let runtime = Self::default();
        runtime.live.lock().unwrap().insert(id.to_string());
        runtime
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn ensure_image(&self, _image: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn create_container(&self, _spec: &ContainerSpec) -> Result<String, RuntimeError> {
        Err(RuntimeError::Api("containers are created by the supervisor".into()))
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotFound(id.to_string()))
    }

    async fn attach(&self, id: &str) -> Result<OutputStream, RuntimeError> {
        Err(RuntimeError::NotFound(id.to_string()))
    }

    async fn kill(&self, id: &str) -> Result<(), RuntimeError> {
        Err(RuntimeError::NotFound(id.to_string()))
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.removed.lock().unwrap().push(id.to_string());
        if self.live.lock().unwrap().remove(id) {
            Ok(())
        } else {
            Err(RuntimeError::NotFound(id.to_string()))
        }
    }

    async fn exists(&self, id: &str) -> Result<bool, RuntimeError> {
        Ok(self.live.lock().unwrap().contains(id))
    }
}

/// Answers every HTTP request with a fixed status and body.
pub struct ProbeResponder {
    pub port: u16,
    task: JoinHandle<()>,
}

impl ProbeResponder {
    pub async fn start(status: u16, body: &'static str) -> Self {
        Self::start_after(Duration::ZERO, status, body).await
    }

    /// Accepts and immediately hangs up on every connection for `delay`,
    /// the way a published container port behaves before the service inside
    /// listens, then answers like [`ProbeResponder::start`].
    pub async fn start_after(delay: Duration, status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let answering_from = Instant::now() + delay;
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if Instant::now() < answering_from {
                    drop(stream);
                    continue;
                }
                tokio::spawn(respond(stream, status, body));
            }
        });
        Self { port, task }
    }

    /// The usual answer of an empty DynamoDB Local.
    pub async fn list_tables() -> Self {
        Self::start(200, r#"{"TableNames":[]}"#).await
    }
}

impl Drop for ProbeResponder {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(mut stream: TcpStream, status: u16, body: &'static str) {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        // Port probes connect and hang up without sending anything.
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        request.extend_from_slice(&chunk[..n]);
        if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if request.len() >= end + 4 + content_length {
                break;
            }
        }
    }

    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/x-amz-json-1.0\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
