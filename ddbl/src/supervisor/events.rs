//! Event sources feeding the supervisor loop.

use std::path::PathBuf;

use futures_util::StreamExt;
use tokio::io::{AsyncBufRead, AsyncWriteExt};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Event;
use crate::error::ProtocolError;
use crate::protocol::{ControlMessage, read_message};
use crate::runtime::OutputStream;

/// Forward SIGINT and SIGTERM as events.
///
/// Registration happens immediately so a signal that arrives while the
/// container is still being created is queued rather than killing the process.
pub fn listen_for_signals(tx: mpsc::Sender<Event>) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(()) = sigint.recv() => Event::Interrupt,
                Some(()) = sigterm.recv() => Event::Terminate,
                else => break,
            };
            info!(?event, "Signal received");
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });

    Ok(())
}

/// Read control messages from the orchestrator. EOF means the orchestrator
/// went away.
pub fn read_control<R>(mut control: R, tx: mpsc::Sender<Event>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match read_message::<_, ControlMessage>(&mut control).await {
                Ok(Some(ControlMessage::Stop)) => {
                    info!("Stop requested");
                    if tx.send(Event::Stop).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    info!("Control channel closed");
                    let _ = tx.send(Event::ParentGone).await;
                    return;
                }
                Err(ProtocolError::Decode { line, source }) => {
                    warn!(line = %line, error = %source, "Ignoring malformed control message");
                }
                Err(e) => {
                    warn!(error = %e, "Control channel failed");
                    let _ = tx.send(Event::ParentGone).await;
                    return;
                }
            }
        }
    });
}

/// Copy container output to our stderr and to `log_path`. Signals
/// [`Event::ContainerExited`] once the stream ends.
pub fn forward_output(mut output: OutputStream, log_path: PathBuf, tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        let mut log_file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "Cannot open container log");
                None
            }
        };
        let mut stderr = tokio::io::stderr();

        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    let _ = stderr.write_all(&bytes).await;
                    if let Some(file) = log_file.as_mut()
                        && let Err(e) = file.write_all(&bytes).await
                    {
                        warn!(error = %e, "Container log write failed");
                        log_file = None;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Container output stream failed");
                    break;
                }
            }
        }

        debug!("Container output stream ended");
        let _ = tx.send(Event::ContainerExited).await;
    });
}
