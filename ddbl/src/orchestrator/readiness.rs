//! Readiness race between the service and the supervisor's exit.
//!
//! The service is ready once the port accepts connections and a `ListTables`
//! request gets a well-formed answer. Connection-level failures of that
//! request count as "not ready yet": a published container port may accept
//! and drop connections before the service inside listens.

use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::ProbeError;

/// Result of waiting for the service.
#[derive(Debug)]
pub enum ReadinessOutcome {
    Ready,
    /// The service answered, but not with a valid `ListTables` response.
    Rejected(ProbeError),
    /// The supervisor exited first. `None` if its status could not be read.
    ProcessExited(Option<ExitStatus>),
    Timeout,
}

/// Poll `localhost:<port>` every `interval` until it accepts a connection,
/// `budget` elapses, or `exited` resolves.
pub async fn race_port<F>(
    port: u16,
    budget: Duration,
    interval: Duration,
    exited: F,
) -> ReadinessOutcome
where
    F: Future<Output = io::Result<ExitStatus>>,
{
    race(budget, exited, async {
        wait_port(port, interval).await;
        Ok(())
    })
    .await
}

/// Like [`race_port`], then keep issuing `probe` until it gets an answer.
/// The whole sequence shares one `budget`.
pub async fn race_service<F>(
    port: u16,
    budget: Duration,
    interval: Duration,
    probe: &ListTablesProbe,
    exited: F,
) -> ReadinessOutcome
where
    F: Future<Output = io::Result<ExitStatus>>,
{
    race(budget, exited, async {
        wait_port(port, interval).await;
        wait_answer(probe, interval).await
    })
    .await
}

async fn race<F, R>(budget: Duration, exited: F, ready: R) -> ReadinessOutcome
where
    F: Future<Output = io::Result<ExitStatus>>,
    R: Future<Output = Result<(), ProbeError>>,
{
    tokio::select! {
        // Prefer reporting the exit when both are ready.
        biased;
        status = exited => ReadinessOutcome::ProcessExited(status.ok()),
        ready = tokio::time::timeout(budget, ready) => match ready {
            Ok(Ok(())) => ReadinessOutcome::Ready,
            Ok(Err(e)) => ReadinessOutcome::Rejected(e),
            Err(_) => ReadinessOutcome::Timeout,
        },
    }
}

async fn wait_port(port: u16, interval: Duration) {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match TcpStream::connect(("localhost", port)).await {
            Ok(_) => {
                info!(port, attempts, "Port reachable");
                return;
            }
            Err(e) => debug!(port, attempts, error = %e, "Port not reachable yet"),
        }
        tokio::time::sleep(interval).await;
    }
}

async fn wait_answer(probe: &ListTablesProbe, interval: Duration) -> Result<(), ProbeError> {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match probe.probe().await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_unreachable() => {
                debug!(attempts, error = %e, "Service not answering yet");
            }
            Err(e) => return Err(e),
        }
        tokio::time::sleep(interval).await;
    }
}

#[derive(Debug, Deserialize)]
struct ListTablesOutput {
    #[serde(rename = "TableNames")]
    table_names: Vec<String>,
}

/// Application-level sanity check: one DynamoDB `ListTables` call.
pub struct ListTablesProbe {
    client: reqwest::Client,
    endpoint: String,
}

impl ListTablesProbe {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Returns the table names the service reported.
    pub async fn probe(&self) -> Result<Vec<String>, ProbeError> {
        // DynamoDB Local wants a SigV4-shaped header but never checks the signature.
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-amz-json-1.0")
            .header("X-Amz-Target", "DynamoDB_20120810.ListTables")
            .header(
                "Authorization",
                "AWS4-HMAC-SHA256 Credential=local/20240101/us-east-1/dynamodb/aws4_request, \
                 SignedHeaders=content-type;host;x-amz-target, Signature=0",
            )
            .body("{}")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ProbeError::Status { status, body });
        }

        let output: ListTablesOutput = serde_json::from_str(&body)
            .map_err(|source| ProbeError::Malformed { body, source })?;
        info!(endpoint = %self.endpoint, tables = output.table_names.len(), "Probe succeeded");
        Ok(output.table_names)
    }
}
