use std::error::Error;

use tracing::{debug, info, instrument, trace};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;

use agripump_api as api;
use agripump_device as device;
use agripump_util as util;

use crate::api::{DeviceProxy, LocalAddress, ProxyConfig};
use crate::cli::Cli;
use crate::device::{ControlSurface, HttpTransport};
use crate::util::request::Client;

fn initialize_tracing() {
    // Use some log defaults. These can be overriden using RUST_LOG
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("debug,hyper=error,hyper_util=error,reqwest=info")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();

    let cli = cli::parse();

    start_control(cli).await
}

#[instrument(name = "agripump", skip_all, err)]
async fn start_control(cli: Cli) -> Result<(), Box<dyn Error>> {
    let control_config = cli.control_config();
    let request_config = cli.request_config();
    trace!(
        device = %cli.device_endpoint,
        control = ?control_config,
        request = ?request_config,
        "using config:"
    );

    // Bind the local API first so we fail early if the address is taken
    let local_address = cli.local_api_address.clone().unwrap_or_default();
    let listener = local_address.bind().await?;
    debug!("bound to local address {local_address}");

    let device_proxy = cli.device_proxy.then(|| {
        let device_uri = cli
            .device_endpoint
            .join(&cli.device_api_prefix)
            .unwrap_or_else(|_| cli.device_endpoint.clone());
        DeviceProxy::new(ProxyConfig {
            timeout: request_config.timeout,
            ..ProxyConfig::new(device_uri.into())
        })
    });

    let client = Client::new(cli.device_endpoint.clone(), request_config)?;
    let mut surface = ControlSurface::mount(
        HttpTransport::new(client, cli.device_api_prefix.clone()),
        control_config,
    );

    let res: Result<(), Box<dyn Error>> = tokio::select! {
        // Start local API server
        res = api::start(listener, surface.handle(), device_proxy) => res.map_err(|e| e.into()),

        // Terminate on Ctrl-C
        res = tokio::signal::ctrl_c() => {
            info!("shutting down");
            res.map_err(|e| e.into())
        }
    };

    // Stop polling and cancel anything in flight before exiting
    surface.unmount().await;

    res
}
