//! `serialport` behind the `embedded_io` traits, plus port selection.

use anyhow::{Context, bail};
use hm305_psu::config::{SerialConfig, to_std};
use inquire::Select;
use serialport::SerialPort;
use std::io::{Read, Write};

/// An open serial port, seen through the `embedded_io` traits.
///
/// With the `std` feature `embedded_io` already treats [`std::io::Error`] as
/// its error type, so reads and writes pass straight through. A read timeout
/// surfaces as `TimedOut`, which is how the session sees the end of a reply.
pub struct PortWrapper(Box<dyn SerialPort>);

impl embedded_io::ErrorType for PortWrapper {
    type Error = std::io::Error;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

/// Use `port_name` if given, otherwise ask which port to use.
pub fn choose_port(port_name: Option<String>) -> anyhow::Result<String> {
    if let Some(port_name) = port_name {
        return Ok(port_name);
    }

    let ports = serialport::available_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        bail!("no serial ports found");
    }
    let port_names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
    let port_name = Select::new("Select a serial port:", port_names)
        .prompt()
        .context("failed to select port")?;
    Ok(port_name)
}

pub fn open(port_name: &str, config: &SerialConfig) -> anyhow::Result<PortWrapper> {
    let port = serialport::new(port_name, config.baud_rate)
        .timeout(to_std(config.timeout))
        .open()
        .with_context(|| format!("failed to open {port_name}"))?;
    Ok(PortWrapper(port))
}
