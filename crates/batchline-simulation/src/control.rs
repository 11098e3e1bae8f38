// Purpose: Operator commands and the handle used to deliver them to a running simulation.

use std::fmt;
use std::str::FromStr;

use batchline_sync::CancellationToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::{SimulationError, SimulationResult};

/// Something the operator asks a running simulation to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    PauseProduction,
    ResumeProduction,
    PauseDelivery,
    ResumeDelivery,
    /// Close the current batch once every worker is waiting for it
    SummarizeBatch,
    Status,
    Shutdown,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::PauseProduction,
        Command::ResumeProduction,
        Command::PauseDelivery,
        Command::ResumeDelivery,
        Command::SummarizeBatch,
        Command::Status,
        Command::Shutdown,
    ];

    /// Single-key binding
    pub fn key(self) -> char {
        match self {
            Command::PauseProduction => 'p',
            Command::ResumeProduction => 'r',
            Command::PauseDelivery => 'k',
            Command::ResumeDelivery => 'l',
            Command::SummarizeBatch => 'b',
            Command::Status => 's',
            Command::Shutdown => 'q',
        }
    }

    pub fn from_key(key: char) -> Option<Command> {
        let key = key.to_ascii_lowercase();
        Command::ALL.into_iter().find(|command| command.key() == key)
    }

    /// Long name, as accepted by `FromStr`
    pub fn name(self) -> &'static str {
        match self {
            Command::PauseProduction => "pause-production",
            Command::ResumeProduction => "resume-production",
            Command::PauseDelivery => "pause-delivery",
            Command::ResumeDelivery => "resume-delivery",
            Command::SummarizeBatch => "summarize-batch",
            Command::Status => "status",
            Command::Shutdown => "shutdown",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::PauseProduction => "Pause order preparation",
            Command::ResumeProduction => "Resume order preparation",
            Command::PauseDelivery => "Pause delivery",
            Command::ResumeDelivery => "Resume delivery",
            Command::SummarizeBatch => "Sum up the batch income",
            Command::Status => "Show queue and batch status",
            Command::Shutdown => "Exit",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input that names no command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command: {0:?}")]
pub struct UnknownCommand(pub String);

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let mut chars = trimmed.chars();
        if let (Some(key), None) = (chars.next(), chars.next()) {
            return Command::from_key(key).ok_or_else(|| UnknownCommand(trimmed.to_string()));
        }

        let normalized = trimmed.to_ascii_lowercase().replace('_', "-");
        Command::ALL
            .into_iter()
            .find(|command| command.name() == normalized)
            .ok_or_else(|| UnknownCommand(trimmed.to_string()))
    }
}

/// Cloneable sender for operator commands
#[derive(Debug, Clone)]
pub struct ControlHandle {
    commands: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl ControlHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, shutdown: CancellationToken) -> Self {
        Self { commands, shutdown }
    }

    /// Queue a command for the controller
    pub async fn send(&self, command: Command) -> SimulationResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SimulationError::ControlChannelClosed)
    }

    /// Like `send`, for callers outside the runtime such as an input thread
    pub fn blocking_send(&self, command: Command) -> SimulationResult<()> {
        self.commands
            .blocking_send(command)
            .map_err(|_| SimulationError::ControlChannelClosed)
    }

    /// Stop the run without going through the command queue
    ///
    /// Safe to call from a signal handler.
    pub fn request_shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("shutdown requested");
            self.shutdown.cancel();
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_round_trip() {
        for command in Command::ALL {
            assert_eq!(Command::from_key(command.key()), Some(command));
            assert_eq!(command.key().to_string().parse::<Command>(), Ok(command));
        }
        assert_eq!(Command::from_key('Q'), Some(Command::Shutdown));
        assert_eq!(Command::from_key('x'), None);
    }

    #[test]
    fn test_long_names() {
        assert_eq!("pause-production".parse::<Command>(), Ok(Command::PauseProduction));
        assert_eq!("  Summarize_Batch\n".parse::<Command>(), Ok(Command::SummarizeBatch));
        assert_eq!(Command::ResumeDelivery.to_string(), "resume-delivery");
        assert_eq!(
            "explode".parse::<Command>(),
            Err(UnknownCommand("explode".to_string()))
        );
        assert!("".parse::<Command>().is_err());
    }

    #[test]
    fn test_serde_uses_long_names() {
        let json = serde_json::to_string(&Command::PauseDelivery).unwrap();
        assert_eq!(json, "\"pause-delivery\"");
    }

    #[tokio::test]
    async fn test_handle_reports_closed_channel() {
        let (sender, receiver) = mpsc::channel(1);
        let handle = ControlHandle::new(sender, CancellationToken::new());
        drop(receiver);

        assert!(matches!(
            handle.send(Command::Status).await,
            Err(SimulationError::ControlChannelClosed)
        ));
    }

    #[test]
    fn test_request_shutdown_cancels_token() {
        let (sender, _receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        let handle = ControlHandle::new(sender, token.clone());

        handle.request_shutdown();
        assert!(token.is_cancelled());
        assert!(handle.is_shutdown_requested());
    }
}
