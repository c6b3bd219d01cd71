//! Runs a controller as a task so several callers can share it.
//!
//! The task is the controller's only owner. Callers send commands over a
//! channel and read state from the controller's `watch` view.

use px_types::ColorPair;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::{InFlightWrite, PixelSyncController, WriteStep};
use crate::state::{SubmitError, SyncView};

const COMMAND_CAPACITY: usize = 32;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("pixel sync task has stopped")]
    Stopped,
}

enum Command {
    Submit {
        colors: Option<ColorPair>,
        reply: oneshot::Sender<Result<(), SubmitError>>,
    },
    Acknowledge {
        reply: oneshot::Sender<bool>,
    },
    SetColors {
        colors: ColorPair,
    },
    Randomize {
        reply: oneshot::Sender<ColorPair>,
    },
    Rehydrate,
}

/// Cloneable handle to a running controller task. The task stops, and
/// unsubscribes from the ledger, once every handle is dropped.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SyncView>,
}

impl SyncHandle {
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    /// Starts a submission of `colors`, or of the current draft. Returns once
    /// the submission is accepted; progress shows up in the view.
    pub async fn submit(&self, colors: Option<ColorPair>) -> Result<(), DriverError> {
        let (reply, accepted) = oneshot::channel();
        self.send(Command::Submit { colors, reply }).await?;
        accepted.await.map_err(|_| DriverError::Stopped)??;
        Ok(())
    }

    pub async fn acknowledge(&self) -> Result<bool, DriverError> {
        let (reply, changed) = oneshot::channel();
        self.send(Command::Acknowledge { reply }).await?;
        changed.await.map_err(|_| DriverError::Stopped)
    }

    pub async fn set_colors(&self, colors: ColorPair) -> Result<(), DriverError> {
        self.send(Command::SetColors { colors }).await
    }

    pub async fn randomize_colors(&self) -> Result<ColorPair, DriverError> {
        let (reply, colors) = oneshot::channel();
        self.send(Command::Randomize { reply }).await?;
        colors.await.map_err(|_| DriverError::Stopped)
    }

    pub async fn rehydrate(&self) -> Result<(), DriverError> {
        self.send(Command::Rehydrate).await
    }

    async fn send(&self, command: Command) -> Result<(), DriverError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DriverError::Stopped)
    }
}

/// Hydrates `controller` and then serves commands and subscription events
/// until every handle is dropped.
pub fn spawn(controller: PixelSyncController) -> (SyncHandle, JoinHandle<()>) {
    let (commands, inbox) = mpsc::channel(COMMAND_CAPACITY);
    let handle = SyncHandle {
        commands,
        view: controller.watch(),
    };
    let task = tokio::spawn(run(controller, inbox));
    (handle, task)
}

async fn run(mut controller: PixelSyncController, mut inbox: mpsc::Receiver<Command>) {
    controller.hydrate().await;

    // At most one write is in flight; commands are served while it runs.
    let mut write: Option<InFlightWrite> = None;
    loop {
        tokio::select! {
            command = inbox.recv() => match command {
                Some(command) => execute(&mut controller, &mut write, command).await,
                None => break,
            },
            step = next_step(&mut write) => {
                if let Some(current) = write.as_mut() {
                    if let Some(state) = controller.advance(current, step) {
                        debug!("submission finished: {:?}", state);
                        write = None;
                    }
                }
            }
            appended = controller.process_next(), if controller.is_subscribed() => {
                debug!("subscription event processed (new: {:?})", appended);
            }
        }
    }

    if write.take().is_some() {
        info!("abandoning the in-flight submission");
    }
    controller.shutdown();
    info!("pixel sync task stopped");
}

async fn next_step(write: &mut Option<InFlightWrite>) -> WriteStep {
    match write {
        Some(write) => write.next_step().await,
        None => std::future::pending().await,
    }
}

async fn execute(
    controller: &mut PixelSyncController,
    write: &mut Option<InFlightWrite>,
    command: Command,
) {
    match command {
        Command::Submit { colors, reply } => {
            let colors = colors.unwrap_or_else(|| controller.draft().clone());
            match controller.begin_submit(colors) {
                Ok(started) => {
                    *write = Some(started);
                    let _ = reply.send(Ok(()));
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            }
        }
        Command::Acknowledge { reply } => {
            let _ = reply.send(controller.acknowledge());
        }
        Command::SetColors { colors } => controller.set_colors(colors),
        Command::Randomize { reply } => {
            let _ = reply.send(controller.randomize_colors().clone());
        }
        Command::Rehydrate => {
            controller.hydrate().await;
        }
    }
}
