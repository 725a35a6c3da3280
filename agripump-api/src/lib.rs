use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::io;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, UnixListener};
use tower_http::trace::TraceLayer;
use tracing::{
    Span, debug_span,
    field::{Empty, display},
    info, instrument,
};

use agripump_device::{CommandError, CommandResult, ControlHandle, ControlState};

mod proxy;

pub use proxy::{DeviceProxy, ProxyConfig, ProxyError, proxy};

pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// Local API listen address
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum LocalAddress {
    Tcp(SocketAddr),
    Unix(path::PathBuf),
}

impl Display for LocalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalAddress::Tcp(socket_addr) => socket_addr.fmt(f),
            LocalAddress::Unix(path) => path.as_path().display().fmt(f),
        }
    }
}

impl FromStr for LocalAddress {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddr>()
            .map(LocalAddress::Tcp)
            .or_else(|_| Ok(LocalAddress::Unix(path::Path::new(s).to_path_buf())))
    }
}

impl Default for LocalAddress {
    fn default() -> Self {
        LocalAddress::Tcp(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080))
    }
}

impl LocalAddress {
    /// Bind a listener on this address
    pub async fn bind(&self) -> io::Result<Listener> {
        let listener = match self {
            LocalAddress::Tcp(socket_addr) => Listener::Tcp(TcpListener::bind(socket_addr).await?),
            LocalAddress::Unix(path) => Listener::Unix(UnixListener::bind(path)?),
        };
        Ok(listener)
    }
}

/// Start the API
///
/// Receives a listener already bound to the right address and the handle of
/// the mounted control surface. If a device proxy is given, requests that no
/// route handles are forwarded to the device.
#[instrument(name = "api", skip_all)]
pub async fn start(
    listener: Listener,
    handle: ControlHandle,
    device_proxy: Option<DeviceProxy>,
) -> io::Result<()> {
    let api_span = Span::current();
    let app = Router::new()
        .route("/v1/ping", get(|| async { "OK" }))
        .route("/v1/state", get(get_state))
        .route("/v1/power", post(set_power))
        .route("/v1/direction", post(toggle_direction))
        .route("/v1/speed", post(set_speed))
        .route("/v1/retry", post(retry));

    let app = match device_proxy {
        Some(device_proxy) => app.fallback(move |request| proxy(device_proxy, request)),
        None => app,
    };

    // Enable tracing
    let app = app.layer(
        TraceLayer::new_for_http()
            .make_span_with(move |request: &Request<Body>| {
                debug_span!(parent: &api_span, "request",
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                    status = Empty,
                )
            })
            .on_response(|response: &Response<Body>, _: Duration, span: &Span| {
                span.record("status", display(response.status()));
            }),
    );

    let app = app.with_state(handle);

    info!("ready");

    match listener {
        Listener::Tcp(listener) => axum::serve(listener, app).await,
        Listener::Unix(listener) => axum::serve(listener, app).await,
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{0}")]
    InvalidInput(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Command(CommandError::Busy) => StatusCode::CONFLICT,
            ApiError::Command(CommandError::Superseded) => StatusCode::ACCEPTED,
            ApiError::Command(CommandError::Disconnected | CommandError::Cancelled) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Command(CommandError::Request(_)) => StatusCode::BAD_GATEWAY,
        };

        (status, self.to_string()).into_response()
    }
}

/// Turn a command outcome into a response
///
/// Returns the state acknowledged by the device, or no content if the device
/// did not send any.
fn acknowledge(result: CommandResult) -> Result<Response, ApiError> {
    match result? {
        Some(device) => Ok(Json(device).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Handle `GET /v1/state`
async fn get_state(State(handle): State<ControlHandle>) -> Json<ControlState> {
    Json(handle.state())
}

/// Power setting, either `"ON"`/`"OFF"` or a boolean
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum PowerValue {
    Flag(bool),
    Label(String),
}

impl PowerValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            PowerValue::Flag(on) => Some(*on),
            PowerValue::Label(label) if label.eq_ignore_ascii_case("on") => Some(true),
            PowerValue::Label(label) if label.eq_ignore_ascii_case("off") => Some(false),
            PowerValue::Label(_) => None,
        }
    }
}

#[derive(Deserialize, Debug)]
struct PowerBody {
    power: PowerValue,
}

/// Handle `POST /v1/power`
async fn set_power(
    State(handle): State<ControlHandle>,
    Json(body): Json<PowerBody>,
) -> Result<Response, ApiError> {
    let on = body.power.as_bool().ok_or_else(|| {
        ApiError::InvalidInput(format!("unknown power value {:?}", body.power))
    })?;

    acknowledge(handle.power(on).await)
}

/// Handle `POST /v1/direction`
///
/// Reverses the current direction of the motor
async fn toggle_direction(State(handle): State<ControlHandle>) -> Result<Response, ApiError> {
    acknowledge(handle.toggle_direction().await)
}

#[derive(Deserialize, Debug)]
struct SpeedBody {
    speed: i64,
}

/// Handle `POST /v1/speed`
///
/// The response is only sent once the debounced value reached the device, or
/// with `202 Accepted` if a newer value replaced it in the meantime.
async fn set_speed(
    State(handle): State<ControlHandle>,
    Json(body): Json<SpeedBody>,
) -> Result<Response, ApiError> {
    let speed = body.speed.clamp(0, agripump_device::MAX_SPEED as i64) as u8;
    acknowledge(handle.set_speed(speed).await)
}

/// Handle `POST /v1/retry`
async fn retry(State(handle): State<ControlHandle>) -> StatusCode {
    if !handle.retry() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::ACCEPTED
}
