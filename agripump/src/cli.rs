use clap::{ArgAction, Parser, builder::BoolishValueParser};
use std::num::{NonZeroU64, ParseIntError};
use std::time::Duration;

use crate::api::LocalAddress;
use crate::device::ControlConfig;
use crate::util::http::Uri;
use crate::util::request::RequestConfig;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

fn parse_nonzero_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: NonZeroU64 = s.parse()?;
    Ok(Duration::from_millis(millis.get()))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Base URI of the motor controller, eg. "http://10.127.245.160"
    #[arg(
        env = "AGRIPUMP_DEVICE_ENDPOINT",
        long = "device-endpoint",
        value_name = "uri"
    )]
    pub device_endpoint: Uri,

    /// Path prefix of the device HTTP API
    #[arg(
        env = "AGRIPUMP_DEVICE_API_PREFIX",
        long = "device-api-prefix",
        value_name = "path",
        default_value = "/api"
    )]
    pub device_api_prefix: String,

    /// Local API listen address
    #[arg(
        env = "AGRIPUMP_LOCAL_API_ADDRESS",
        long = "local-api-address",
        value_name = "addr"
    )]
    pub local_api_address: Option<LocalAddress>,

    /// Forward local requests under /api to the device API
    #[arg(
        env = "AGRIPUMP_DEVICE_PROXY",
        long = "device-proxy",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub device_proxy: bool,

    /// Device status poll interval in milliseconds
    #[arg(
        env = "AGRIPUMP_POLL_INTERVAL_MS",
        long = "poll-interval-ms",
        value_name = "ms",
        value_parser = parse_nonzero_duration
    )]
    pub poll_interval: Option<Duration>,

    /// Retry delay after the first failed poll in milliseconds
    #[arg(
        env = "AGRIPUMP_INITIAL_BACKOFF_MS",
        long = "initial-backoff-ms",
        value_name = "ms",
        value_parser = parse_nonzero_duration
    )]
    pub initial_backoff: Option<Duration>,

    /// Maximum retry delay in milliseconds
    #[arg(
        env = "AGRIPUMP_MAX_BACKOFF_MS",
        long = "max-backoff-ms",
        value_name = "ms",
        value_parser = parse_nonzero_duration
    )]
    pub max_backoff: Option<Duration>,

    /// Quiet period before a speed change is sent, in milliseconds
    #[arg(
        env = "AGRIPUMP_SPEED_DEBOUNCE_MS",
        long = "speed-debounce-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub speed_debounce: Option<Duration>,

    /// Device request timeout in milliseconds
    #[arg(
        env = "AGRIPUMP_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        value_parser = parse_nonzero_duration
    )]
    pub request_timeout: Option<Duration>,
}

impl Cli {
    pub fn control_config(&self) -> ControlConfig {
        let default = ControlConfig::default();
        ControlConfig {
            poll_interval: self.poll_interval.unwrap_or(default.poll_interval),
            initial_backoff: self.initial_backoff.unwrap_or(default.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(default.max_backoff),
            speed_debounce: self.speed_debounce.unwrap_or(default.speed_debounce),
        }
    }

    pub fn request_config(&self) -> RequestConfig {
        let default = RequestConfig::default();
        RequestConfig {
            timeout: self.request_timeout.unwrap_or(default.timeout),
        }
    }
}

pub fn parse() -> Cli {
    Parser::parse()
}
