/*
Control core for a single remote motor/pump device.

A control surface owns one background task that polls the device status
endpoint, backs off while the device is unreachable, and forwards user
commands. Rapid speed changes are debounced into a single trailing
command. Tearing the surface down cancels every timer and in-flight
request so late responses can never change the published state.
*/

mod backoff;
mod command;
mod config;
mod controller;
mod debounce;
mod models;
mod poll;
mod transport;

pub use backoff::Backoff;
pub use command::{Command, CommandError, CommandRequest, CommandResult};
pub use config::ControlConfig;
pub use controller::{ControlHandle, ControlSurface};
pub use debounce::Debouncer;
pub use models::{
    ConnectionStatus, ControlState, DeviceState, Direction, MAX_SPEED, PollStatus,
};
pub use poll::PollScheduler;
pub use transport::{DeviceTransport, HttpTransport};

use agripump_util as util;
