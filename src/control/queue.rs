//! Single FIFO of commands shared by every producer

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::command::{Command, ControlError};

/// Where a command came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Producer {
    Keyboard,
    Network,
    Voice,
    Internal,
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Producer::Keyboard => "keyboard",
            Producer::Network => "network",
            Producer::Voice => "voice",
            Producer::Internal => "internal",
        })
    }
}

/// A command as it sits in the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub command: Command,
    pub producer: Producer,
    pub received_at: DateTime<Utc>,
}

/// Create the queue: one receiver for the controller, senders for producers
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CommandSender {
            tx,
            producer: Producer::Internal,
        },
        CommandReceiver { rx },
    )
}

/// Cloneable producer handle, tagged with its producer
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<QueuedCommand>,
    producer: Producer,
}

impl CommandSender {
    /// A sender for another producer on the same queue
    pub fn for_producer(&self, producer: Producer) -> Self {
        Self {
            tx: self.tx.clone(),
            producer,
        }
    }

    pub fn producer(&self) -> Producer {
        self.producer
    }

    pub fn send(&self, command: Command) -> Result<(), ControlError> {
        tracing::debug!(producer = %self.producer, command = %command, "Queued command");
        self.tx
            .send(QueuedCommand {
                command,
                producer: self.producer,
                received_at: Utc::now(),
            })
            .map_err(|_| ControlError::QueueClosed)
    }

    /// Parse operator text and queue it
    pub fn send_text(&self, text: &str) -> Result<Command, ControlError> {
        let command: Command = text.parse()?;
        self.send(command.clone())?;
        Ok(command)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The controller's end of the queue
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<QueuedCommand>,
}

impl CommandReceiver {
    /// Wait for the next command; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<QueuedCommand> {
        self.rx.recv().await
    }

    /// Next command if one is already queued
    pub fn try_recv(&mut self) -> Result<Option<QueuedCommand>, ControlError> {
        match self.rx.try_recv() {
            Ok(command) => Ok(Some(command)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(ControlError::QueueClosed),
        }
    }
}
