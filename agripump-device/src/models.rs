use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::datetime::DateTime;
use crate::util::json::serialize_duration_to_ms;

/// Highest speed setpoint the device accepts, in percent
pub const MAX_SPEED: u8 = 100;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub fn toggled(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    /// Name used by the device API
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "Forward",
            Direction::Reverse => "Reverse",
        }
    }
}

/// Local view of the motor, authoritative as of the last sync with the device
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    /// true if the motor is energized
    pub power: bool,
    pub direction: Direction,
    /// Speed setpoint in percent, always within `0..=MAX_SPEED`
    pub speed: u8,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            power: false,
            direction: Direction::Forward,
            speed: MAX_SPEED,
        }
    }
}

impl DeviceState {
    /// Map a loosely typed status payload into a device state.
    ///
    /// Devices in the field report `power` either as a boolean or as an
    /// `"ON"`/`"OFF"` string and are not consistent about casing, so both are
    /// accepted. Missing or unrecognized values for `power` and `direction`
    /// read as off and forward respectively. A missing or non-numeric `speed`
    /// keeps the previous setpoint (or the default if there is none).
    pub fn normalize(raw: &Value, prev: Option<&DeviceState>) -> DeviceState {
        let power = match raw.get("power") {
            Some(Value::Bool(on)) => *on,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("on"),
            _ => false,
        };

        let direction = match raw.get("direction") {
            Some(Value::String(s)) if s.eq_ignore_ascii_case("reverse") => Direction::Reverse,
            _ => Direction::Forward,
        };

        let speed = raw
            .get("speed")
            .and_then(Value::as_f64)
            .map(clamp_speed)
            .or(prev.map(|p| p.speed))
            .unwrap_or(MAX_SPEED);

        DeviceState {
            power,
            direction,
            speed,
        }
    }
}

fn clamp_speed(value: f64) -> u8 {
    value.clamp(0.0, MAX_SPEED as f64).round() as u8
}

/// Reachability of the device, derived from poll and command outcomes
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub last_seen_at: Option<DateTime>,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    /// Record a successful exchange with the device
    pub fn mark_seen(&mut self) {
        self.connected = true;
        self.last_seen_at = Some(DateTime::now());
        self.last_error = None;
    }

    /// Record a failed exchange with the device
    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.connected = false;
        self.last_error = Some(message.into());
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    #[default]
    Idle,
    Polling,
    Scheduled,
    Stopped,
}

/// Snapshot published by the controller after every change
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlState {
    pub device: DeviceState,
    pub connection: ConnectionStatus,
    /// A user command is in flight
    pub busy: bool,
    pub poll: PollStatus,
    /// Current retry delay, zero while the device is healthy
    #[serde(rename = "backoff_ms", serialize_with = "serialize_duration_to_ms")]
    pub backoff: Duration,
}

impl ControlState {
    /// Whether user commands are currently accepted
    pub fn controls_enabled(&self) -> bool {
        self.connection.connected && !self.busy
    }
}
