use std::pin::Pin;
use std::task::{Context, Poll};

use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::models::{DeviceState, Direction};
use crate::util::request::RequestError;

/// A user command understood by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Power(bool),
    Direction(Direction),
    Speed(u8),
}

impl Command {
    /// Device endpoint for the command, relative to the API prefix
    pub fn endpoint(&self) -> &'static str {
        match self {
            Command::Power(_) => "/power",
            Command::Direction(_) => "/direction",
            Command::Speed(_) => "/speed",
        }
    }

    /// JSON body sent to the endpoint
    pub fn payload(&self) -> Value {
        match self {
            Command::Power(on) => json!({ "power": if *on { "ON" } else { "OFF" } }),
            Command::Direction(direction) => json!({ "direction": direction.as_str() }),
            Command::Speed(speed) => json!({ "speed": speed }),
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("another command is in progress")]
    Busy,

    #[error("device is not connected")]
    Disconnected,

    /// A newer speed input replaced this one before it was sent
    #[error("superseded by a newer value")]
    Superseded,

    #[error("control surface was stopped")]
    Cancelled,

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Device state acknowledged by the device, `None` if it sent no body
pub type CommandResult = Result<Option<DeviceState>, CommandError>;

/// Outcome of a command issued through a control handle.
///
/// Resolves once the device has answered, or when the command is rejected,
/// superseded or cancelled. Dropping the request does not cancel the command.
#[must_use = "command outcomes should be handled"]
pub struct CommandRequest {
    result_rx: oneshot::Receiver<CommandResult>,
}

impl CommandRequest {
    pub(crate) fn new(result_rx: oneshot::Receiver<CommandResult>) -> Self {
        Self { result_rx }
    }
}

impl Future for CommandRequest {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.result_rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CommandError::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}
