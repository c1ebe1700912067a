//! Container Supervisor - owns exactly one container for its whole life.
//!
//! The supervisor runs as its own process so that terminating that process,
//! by stop message or by signal, is enough to get the container killed and
//! removed. Its behaviour is an explicit state machine:
//!
//! ```text
//! Running --(Stop | Interrupt | Terminate | ParentGone)--> Terminating --> Terminated
//! Running --(ContainerExited)---------------------------> Terminating --> Terminated
//! ```
//!
//! Events are delivered through a channel, so tests drive the machine
//! without real OS signals.

mod events;
mod spec;

pub use spec::{DEFAULT_IMAGE, container_spec};

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{RuntimeError, SupervisorError};
use crate::protocol::{LaunchConfig, SupervisorMessage, write_message};
use crate::runtime::ContainerRuntime;

const CONTAINER_LOG: &str = "container.log";

/// Inputs to the supervisor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Stop message from the orchestrator.
    Stop,
    /// SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// The control channel closed.
    ParentGone,
    /// The container's output stream ended.
    ContainerExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    Terminating,
    Terminated,
}

/// The one container a supervisor owns.
pub struct ContainerSlot {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
}

impl ContainerSlot {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, container_id: String) -> Self {
        Self {
            runtime,
            container_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.container_id
    }

    /// Kill then remove. A failed kill does not skip the removal.
    async fn kill_and_remove(&self) -> Result<(), RuntimeError> {
        info!(container_id = %self.container_id, "Killing container");
        if let Err(e) = self.runtime.kill(&self.container_id).await {
            warn!(container_id = %self.container_id, error = %e, "Kill failed, removing anyway");
        }
        self.remove().await
    }

    async fn remove(&self) -> Result<(), RuntimeError> {
        info!(container_id = %self.container_id, "Removing container");
        match self.runtime.remove(&self.container_id).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// State machine around a created container.
pub struct Supervisor<W> {
    slot: ContainerSlot,
    out: W,
    state: State,
}

impl<W: AsyncWrite + Unpin> Supervisor<W> {
    pub fn new(slot: ContainerSlot, out: W) -> Self {
        Self {
            slot,
            out,
            state: State::Running,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Apply one event. Events after the first terminal one are ignored.
    pub async fn handle(&mut self, event: Event) -> Result<(), SupervisorError> {
        if self.state != State::Running {
            debug!(?event, state = ?self.state, "Ignoring event");
            return Ok(());
        }

        self.state = State::Terminating;
        let container_id = self.slot.id().to_string();

        let result = match event {
            Event::ContainerExited => {
                warn!(container_id = %container_id, "Container exited on its own");
                let removed = self.slot.remove().await;
                self.notify(SupervisorMessage::Exited {
                    container_id: container_id.clone(),
                })
                .await;
                removed
                    .map_err(SupervisorError::from)
                    .and(Err(SupervisorError::ContainerExited { container_id }))
            }
            Event::Stop | Event::Interrupt | Event::Terminate | Event::ParentGone => {
                info!(?event, container_id = %container_id, "Terminating");
                let removed = self.slot.kill_and_remove().await;
                self.notify(SupervisorMessage::Stopped { container_id }).await;
                removed.map_err(SupervisorError::from)
            }
        };

        self.state = State::Terminated;
        result
    }

    /// Process events until terminated. A closed event channel counts as
    /// [`Event::ParentGone`].
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) -> Result<(), SupervisorError> {
        while let Some(event) = events.recv().await {
            let result = self.handle(event).await;
            if self.state == State::Terminated {
                return result;
            }
        }
        self.handle(Event::ParentGone).await
    }

    async fn notify(&mut self, message: SupervisorMessage) {
        // The orchestrator may already be gone.
        if let Err(e) = write_message(&mut self.out, &message).await {
            warn!(error = %e, "Failed to notify orchestrator");
        }
    }
}

/// Supervisor entry point: create and start the container described by
/// `config`, then serve events until it is torn down.
///
/// `control` carries [`crate::protocol::ControlMessage`]s from the
/// orchestrator and `out` receives [`SupervisorMessage`]s.
pub async fn run<R, W>(
    config: LaunchConfig,
    runtime: Arc<dyn ContainerRuntime>,
    control: R,
    mut out: W,
) -> Result<(), SupervisorError>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (tx, rx) = mpsc::channel::<Event>(16);
    events::listen_for_signals(tx.clone())?;

    let image = config
        .image
        .clone()
        .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
    let spec = container_spec(&config, &image);

    runtime.ensure_image(&image).await?;
    let container_id = runtime.create_container(&spec).await?;
    info!(container_id = %container_id, image = %image, port = config.port, "Container created");

    let slot = ContainerSlot::new(runtime.clone(), container_id.clone());
    if let Err(e) = start(&slot, &config, &mut out, tx.clone()).await {
        error!(container_id = %container_id, error = %e, "Container failed to start");
        if let Err(e) = slot.remove().await {
            warn!(container_id = %container_id, error = %e, "Failed to remove container");
        }
        return Err(e);
    }
    info!(container_id = %container_id, "Container started");

    events::read_control(control, tx);
    Supervisor::new(slot, out).run(rx).await
}

async fn start<W: AsyncWrite + Unpin>(
    slot: &ContainerSlot,
    config: &LaunchConfig,
    out: &mut W,
    tx: mpsc::Sender<Event>,
) -> Result<(), SupervisorError> {
    write_message(
        out,
        &SupervisorMessage::Created {
            container_id: slot.id().to_string(),
        },
    )
    .await?;

    // Attach before starting so no early output is lost.
    let output = slot.runtime.attach(slot.id()).await?;
    events::forward_output(output, config.logs_dir.join(CONTAINER_LOG), tx);

    slot.runtime.start(slot.id()).await?;
    Ok(())
}
