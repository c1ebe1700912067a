//! The spawned supervisor child process, seen from the orchestrator.

use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::SupervisorCommand;
use crate::error::{LaunchError, ProtocolError};
use crate::protocol::{
    ControlMessage, LaunchConfig, SUPERVISOR_COMMAND, SupervisorMessage, read_message,
    write_message,
};

/// Handle to a running supervisor. Only a process handle and its pipes are
/// kept; nothing is shared with the child.
pub struct SupervisorProcess {
    child: Child,
    control: Option<ChildStdin>,
    messages: mpsc::UnboundedReceiver<SupervisorMessage>,
    container_id: Option<String>,
}

impl SupervisorProcess {
    /// Spawn `<program> [args] launch-ddb-local-docker-subprocess <json>`.
    pub fn spawn(command: &SupervisorCommand, config: &LaunchConfig) -> Result<Self, LaunchError> {
        let arg = config
            .to_arg()
            .map_err(|e| LaunchError::Spawn(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .arg(SUPERVISOR_COMMAND)
            .arg(arg)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        info!(cmd = ?cmd.as_std(), "Spawning supervisor");
        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;

        let control = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError::Spawn(io::Error::other("supervisor stdout not piped")))?;

        let (tx, messages) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            loop {
                match read_message::<_, SupervisorMessage>(&mut reader).await {
                    Ok(Some(msg)) => {
                        debug!(?msg, "Supervisor message");
                        if tx.send(msg).is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(ProtocolError::Decode { line, .. }) => {
                        warn!(line = %line, "Ignoring unexpected supervisor output");
                    }
                    Err(e) => {
                        warn!(error = %e, "Supervisor output failed");
                        return;
                    }
                }
            }
        });

        info!(pid = ?child.id(), "Supervisor spawned");
        Ok(Self {
            child,
            control,
            messages,
            container_id: None,
        })
    }

    /// Container identifier echoed by the supervisor, if seen yet.
    pub fn container_id(&mut self) -> Option<&str> {
        while let Ok(msg) = self.messages.try_recv() {
            self.absorb(msg);
        }
        self.container_id.as_deref()
    }

    /// Resolves when the process exits. Safe to call again after it resolved.
    pub async fn exited(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the supervisor to terminate and wait for its acknowledgment.
    ///
    /// Returns the container identifier the supervisor reported. If the
    /// process is already gone this returns whatever identifier was seen.
    pub async fn kill(&mut self) -> Option<String> {
        info!("Requesting supervisor stop");
        match self.control.take() {
            Some(mut control) => {
                if let Err(e) = write_message(&mut control, &ControlMessage::Stop).await {
                    debug!(error = %e, "Stop message not delivered");
                }
            }
            None => self.signal_terminate(),
        }

        while let Some(msg) = self.messages.recv().await {
            let acknowledged = matches!(msg, SupervisorMessage::Stopped { .. });
            self.absorb(msg);
            if acknowledged {
                break;
            }
        }
        self.container_id.clone()
    }

    pub async fn wait_until_stopped(&mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        info!(status = %status, "Supervisor exited");
        Ok(status)
    }

    /// Send SIGTERM if the process is still running. The supervisor's own
    /// handlers then remove the container.
    pub(crate) fn signal_terminate(&self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        match nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        ) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => warn!(pid, error = %e, "Failed to signal supervisor"),
        }
    }

    fn absorb(&mut self, msg: SupervisorMessage) {
        if let SupervisorMessage::Exited { container_id } = &msg {
            warn!(container_id = %container_id, "Container exited on its own");
        }
        self.container_id = Some(msg.container_id().to_string());
    }
}
