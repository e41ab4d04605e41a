// In crates/engine/src/handle.rs

use events::{Command, EngineStatus};
use tokio::sync::{mpsc, watch};

/// A cheap, cloneable handle for talking to a running decision loop.
///
/// Commands are queued and applied between cycles. Status reads never touch
/// the loop's state; they see the last published snapshot.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<EngineStatus>,
}

impl EngineHandle {
    /// Wraps the two ends the loop listens and publishes on.
    pub fn new(commands: mpsc::Sender<Command>, status: watch::Receiver<EngineStatus>) -> Self {
        Self { commands, status }
    }

    /// Queues a command for the loop.
    pub async fn send(&self, command: Command) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("decision loop is not running"))?;
        tracing::info!(%command, "Command queued for the decision loop.");
        Ok(())
    }

    /// The last published status.
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    /// A receiver that is notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    /// A sender for components that queue commands themselves.
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }
}
