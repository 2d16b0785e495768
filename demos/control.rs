//! One-shot control of an HM305 over its serial port.
//!
//! ```text
//! cargo run --example control -- --port /dev/ttyUSB0 --voltage 5 --current 0.1 --on --get
//! ```

mod port;

use clap::{ArgGroup, Parser};
use hm305_psu::{config::SerialConfig, psu::Hm305, register::State, setting::Parameter};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use port::PortWrapper;

#[derive(Parser, Debug)]
#[command(name = "control")]
#[command(about = "Set and read back an HM305 power supply")]
#[command(group(ArgGroup::new("volt").args(["voltage", "adj_voltage"])))]
#[command(group(ArgGroup::new("output").args(["on", "off"])))]
#[command(group(ArgGroup::new("beeper").args(["beep", "nobeep"])))]
struct Args {
    /// Serial port of the PSU. Asks interactively when omitted.
    #[arg(long)]
    port: Option<String>,

    /// Set voltage
    #[arg(long)]
    voltage: Option<f64>,

    /// Adjust voltage by X
    #[arg(long, value_name = "X", allow_negative_numbers = true)]
    adj_voltage: Option<f64>,

    /// Set current
    #[arg(long)]
    current: Option<f64>,

    /// Switch output on
    #[arg(long)]
    on: bool,

    /// Switch output off
    #[arg(long)]
    off: bool,

    /// Enable beeping
    #[arg(long)]
    beep: bool,

    /// Disable beeping
    #[arg(long)]
    nobeep: bool,

    /// Report output measurements
    #[arg(long)]
    get: bool,

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

    let config = SerialConfig::default();
    let port_name = port::choose_port(args.port)?;
    let port = port::open(&port_name, &config)?;
    let mut psu: Hm305<PortWrapper> = Hm305::new(port, config.unit_id);
    psu.initialize()?;

    if let Some(voltage) = args.voltage {
        info!("Setting voltage:");
        psu.push_setpoint(Parameter::Voltage, voltage)?;
    } else if let Some(delta) = args.adj_voltage {
        info!("Adjusting voltage:");
        psu.setpoints().voltage.increment(delta);
        psu.apply(Parameter::Voltage)?;
    }
    if let Some(current) = args.current {
        info!("Setting current:");
        psu.push_setpoint(Parameter::Current, current)?;
    }
    if args.beep {
        info!("Setting beep: ON");
        psu.set_buzzer_state(State::On)?;
    } else if args.nobeep {
        info!("Setting beep: OFF");
        psu.set_buzzer_state(State::Off)?;
    }
    if args.off {
        info!("Setting output: OFF");
        psu.set_output_state(State::Off)?;
    } else if args.on {
        info!("Setting output: ON");
        psu.set_output_state(State::On)?;
    }
    if args.get {
        info!("{} Volts", psu.read_voltage()?);
        info!("{} Amps", psu.read_current()?);
        info!("{} Watts", psu.read_power_w()?);
    }
    debug!("Done");
    Ok(())
}
