//! This crate provides remote control of the Hanmatek HM305 series of programmable bench power supplies.
//!
//! Example PSU models which this should work with:
//! * HM305P
//! * HM310P
//!
//! The PSU speaks a Modbus-like binary protocol over its USB serial port: fixed 8 byte requests with a trailing
//! CRC16, answered by read results, write echoes or an error frame. The [`codec`] module deals with frames,
//! [`session`] with one exchange at a time, and [`psu::Hm305`] with typed access to the registers.
//!
//! On top of that sits a small command server. Request lines such as `VOLTage 12.5` or `OUTput?` are parsed by the
//! [`factory`] into [`command::Command`]s and handed to the [`dispatcher`], which runs two workers:
//! * a serial worker that owns the link and performs hardware round trips in order;
//! * a fast worker that only touches the cached setpoints, so `VOLTage:SETPoint?` never waits behind the link.
//!
//! The [`server`] module puts a line oriented TCP front end on the dispatcher.
//!
//! The serial port used for PSU comms should be configured like so:
//! * Default baud rate: 9600
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

pub mod codec;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod factory;
pub mod psu;
pub mod register;
pub mod server;
pub mod session;
pub mod setting;

#[cfg(test)]
mod mock_serial;
