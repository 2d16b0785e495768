//! Serve the HM305 command language on a TCP port.
//!
//! ```text
//! cargo run --example server -- --port /dev/ttyUSB0
//! echo "VOLTage?" | nc 127.0.0.1 9091
//! ```

mod port;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use hm305_psu::{
    config::{DispatcherConfig, SerialConfig, ServerConfig},
    dispatcher::Dispatcher,
    factory::CommandRegistry,
    psu::Hm305,
    server::{RequestHandler, Server},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use port::PortWrapper;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Remote control an HM305 power supply over TCP")]
struct Args {
    /// Serial port of the PSU. Asks interactively when omitted.
    #[arg(long)]
    port: Option<String>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9091")]
    bind: SocketAddr,

    /// Modbus unit ID of the PSU
    #[arg(long, default_value_t = 1)]
    unit_id: u8,

    /// Enable verbose logging
    #[arg(long)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let serial_config = SerialConfig {
        unit_id: args.unit_id,
        ..SerialConfig::default()
    };
    let port_name = port::choose_port(args.port)?;
    info!("Using port: {}", port_name);
    let port = port::open(&port_name, &serial_config)?;

    let mut psu: Hm305<PortWrapper> = Hm305::new(port, serial_config.unit_id);
    psu.initialize().context("failed to read setpoints from the PSU")?;
    let setpoints = Arc::clone(psu.setpoints());
    info!(
        "PSU at {:.2} V / {:.3} A, voltage range {:?}, current range {:?}",
        setpoints.voltage.cached_setpoint(),
        setpoints.current.cached_setpoint(),
        setpoints.voltage.bounds(),
        setpoints.current.bounds(),
    );

    let dispatcher = Arc::new(Dispatcher::start(psu, &DispatcherConfig::default())?);
    let handler = RequestHandler::new(dispatcher, CommandRegistry::hm305());
    let server_config = ServerConfig {
        bind_address: args.bind,
        ..ServerConfig::default()
    };
    let server = Server::bind(&server_config, handler)
        .with_context(|| format!("failed to listen on {}", args.bind))?;
    server.serve()?;
    Ok(())
}
