//! One request/reply exchange at a time over the serial link.

use embedded_io::Error as _;
use tracing::debug;

use crate::{
    codec::{self, Function, Response},
    error::{DeviceFault, Error, Result},
    register::Hm305Register,
};

/// Size of the scratch buffer used for each read call.
const READ_CHUNK: usize = 8;

/// Successful outcome of [`Session::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Value of the register that was read.
    Value(u16),
    /// The PSU echoed back a write.
    Written { register: u16, value: u16 },
}

/// Wraps a byte stream implementing [embedded_io::Read] & [embedded_io::Write].
///
/// The PSU gives no length prefix, so a reply is considered complete once the
/// interface stops producing bytes: a read returning `0` or timing out. The
/// interface must therefore be opened with a short read timeout.
pub struct Session<S: embedded_io::Read + embedded_io::Write, const L: usize = 64> {
    interface: S,
    /// Default for PSU is 0x01.
    unit_id: u8,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> Session<S, L> {
    /// Create a new session with the given interface and unit ID.
    pub fn new(interface: S, unit_id: u8) -> Self {
        Self { interface, unit_id }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn interface(&self) -> &S {
        &self.interface
    }

    pub fn interface_mut(&mut self) -> &mut S {
        &mut self.interface
    }

    /// Perform one full exchange: a read of `register` when `value` is `None`,
    /// otherwise a write of `value`.
    pub fn request(&mut self, register: u16, value: Option<u16>) -> Result<Reply, S::Error> {
        match value {
            None => self.read_register(register).map(Reply::Value),
            Some(value) => {
                self.write_register(register, value)?;
                Ok(Reply::Written { register, value })
            }
        }
    }

    /// Read a single register from the PSU.
    pub fn read_register(&mut self, register: impl Into<u16>) -> Result<u16, S::Error> {
        let registers = self.read_registers(register, 1)?;
        registers.first().copied().ok_or(Error::InvalidResponse)
    }

    /// Read two consecutive registers in one exchange, combined as `(high << 16) | low`.
    pub fn read_u32(&mut self, register: impl Into<u16>) -> Result<u32, S::Error> {
        let registers = self.read_registers(register, 2)?;
        match registers.as_slice() {
            [high, low] => Ok((u32::from(*high) << 16) | u32::from(*low)),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Read `count` (1 or 2) consecutive registers.
    pub fn read_registers(
        &mut self,
        register: impl Into<u16>,
        count: u16,
    ) -> Result<heapless::Vec<u16, 2>, S::Error> {
        match self.exchange(Function::Read, register.into(), count)? {
            Response::ReadResult { registers } if registers.len() == count as usize => {
                Ok(registers)
            }
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Write to a single register of the PSU. The echoed acknowledgement must match.
    ///
    /// Known read-only registers are refused without touching the link.
    pub fn write_register(
        &mut self,
        register: impl Into<u16>,
        value: impl Into<u16>,
    ) -> Result<(), S::Error> {
        let register = register.into();
        let value = value.into();
        if Hm305Register::from_address(register).is_some_and(|known| !known.is_writable()) {
            return Err(Error::ReadOnly(register));
        }
        match self.exchange(Function::Write, register, value)? {
            Response::WriteAck {
                register: echoed_register,
                value: echoed_value,
            } if echoed_register == register && echoed_value == value => Ok(()),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Send one frame and decode whatever comes back.
    fn exchange(
        &mut self,
        function: Function,
        register: u16,
        value: u16,
    ) -> Result<Response, S::Error> {
        let request = codec::encode_frame(self.unit_id, function, register, value);
        debug!("TX[{:02}]: {:02X?}", request.len(), request);
        self.interface
            .write_all(&request)
            .map_err(Error::SerialError)?;
        self.interface.flush().map_err(Error::SerialError)?;

        let reply = self.receive()?;
        debug!("RX[{:02}]: {:02X?}", reply.len(), reply.as_slice());

        match codec::decode_frame(&reply)? {
            Response::ProtocolError { code } => {
                let fault = if code == codec::CRC_REJECTED {
                    DeviceFault::CrcRejected
                } else {
                    DeviceFault::Other(code)
                };
                Err(Error::DeviceRejected(fault))
            }
            response => Ok(response),
        }
    }

    /// Keep reading until the interface goes quiet.
    fn receive(&mut self) -> Result<heapless::Vec<u8, L>, S::Error> {
        let mut buff: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut temp_buf = [0u8; READ_CHUNK];
        loop {
            match self.interface.read(&mut temp_buf) {
                Ok(0) => break,
                Ok(bytes_read) => {
                    if buff.extend_from_slice(&temp_buf[..bytes_read]).is_err() {
                        return Err(Error::BufferOverflow);
                    }
                }
                Err(e) if e.kind() == embedded_io::ErrorKind::TimedOut => break,
                Err(e) => return Err(Error::SerialError(e)),
            }
        }
        if buff.is_empty() {
            return Err(Error::Timeout);
        }
        Ok(buff)
    }
}
