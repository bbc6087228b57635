use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use gateway::{Gateway, GatewayConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "device-gateway",
    about = "HTTP gateway for device status, control, firmware and live MJPEG video",
    long_about = "Settings are read from the environment (SERVER_PORT, DEVICE_API_BASE, \
                  VIDEO_STREAM_PORT, ...). Flags override the matching setting."
)]
struct Args {
    /// Bind address (host:port), overrides SERVER_HOST/SERVER_PORT
    #[arg(long, short)]
    bind: Option<SocketAddr>,

    /// Log filter directives
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .init();

    let mut config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    if let Some(bind) = args.bind {
        config = config.with_bind(bind);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: GatewayConfig) -> gateway::Result<()> {
    let ports = &config.device_ports;
    for (protocol, port) in [("mqtt", ports.mqtt), ("modbus", ports.modbus), ("s7", ports.s7)] {
        if let Some(port) = port {
            tracing::info!(protocol, port, "device port configured (not served)");
        }
    }
    tracing::info!(
        bind = %config.bind,
        video = config.video.source.mode(),
        "starting device gateway"
    );

    let gateway = Gateway::new(config)?;
    let shutdown = gateway.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("ctrl-c received, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
        }
    });

    gateway.run().await
}
