//! Frame encoding and decoding for the HM305 serial protocol.
//!
//! The PSU speaks a cut-down Modbus RTU dialect. Requests are always 8 bytes:
//!
//! | byte | content                                    |
//! |------|--------------------------------------------|
//! | 0    | device address                             |
//! | 1    | function (`0x03` read, `0x06` write)       |
//! | 2..4 | register, big-endian                       |
//! | 4..6 | value (write) or register count (read), BE |
//! | 6..8 | CRC16 of bytes 0..6, little-endian         |
//!
//! Replies vary by function, see [`Response`].

use crate::error::FrameError;

/// Length of every request frame, CRC included.
pub const REQUEST_LEN: usize = 8;

/// Longest reply we ever expect: a two register read (3 + 4 + 2 bytes).
pub const MAX_REPLY_LEN: usize = 9;

/// Function code used by the PSU to signal an error.
pub const ERROR_FUNCTION: u8 = 0x83;

/// Error sub-code meaning the PSU failed the CRC of our request.
pub const CRC_REJECTED: u8 = 0x08;

/// The two functions the PSU understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Function {
    /// Read holding registers.
    Read = 0x03,
    /// Write single register.
    Write = 0x06,
}

impl TryFrom<u8> for Function {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x03 => Ok(Function::Read),
            0x06 => Ok(Function::Write),
            other => Err(FrameError::UnknownFunction(other)),
        }
    }
}

/// A request frame, before the CRC is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub device_address: u8,
    pub function: Function,
    pub register: u16,
    /// Value to write, or the number of registers to read.
    pub value: u16,
}

impl Frame {
    /// Serialize this frame and append its CRC.
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        encode_frame(self.device_address, self.function, self.register, self.value)
    }
}

/// A decoded reply from the PSU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Reply to a read. One register, or two for 32-bit quantities.
    ReadResult { registers: heapless::Vec<u16, 2> },
    /// Echo of a single register write.
    WriteAck { register: u16, value: u16 },
    /// The PSU reported an error. `code` is the sub-code from byte 2.
    ProtocolError { code: u8 },
}

impl Response {
    /// Assemble this response as the PSU would send it.
    pub fn encode(&self, device_address: u8) -> heapless::Vec<u8, MAX_REPLY_LEN> {
        let mut out: heapless::Vec<u8, MAX_REPLY_LEN> = heapless::Vec::new();
        // Capacity is sized for the largest variant, pushes cannot fail.
        let _ = out.push(device_address);
        match self {
            Response::ReadResult { registers } => {
                let _ = out.push(Function::Read as u8);
                let _ = out.push((registers.len() * 2) as u8);
                for register in registers {
                    let _ = out.extend_from_slice(&register.to_be_bytes());
                }
            }
            Response::WriteAck { register, value } => {
                let _ = out.push(Function::Write as u8);
                let _ = out.extend_from_slice(&register.to_be_bytes());
                let _ = out.extend_from_slice(&value.to_be_bytes());
            }
            Response::ProtocolError { code } => {
                let _ = out.push(ERROR_FUNCTION);
                let _ = out.push(*code);
            }
        }
        let crc = crc16(&out);
        let _ = out.extend_from_slice(&crc.to_le_bytes());
        out
    }
}

/// Compute the Modbus CRC16 (polynomial `0xA001`, seed `0xFFFF`) of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Build a request frame: five big-endian fields followed by a little-endian CRC16.
pub fn encode_frame(
    device_address: u8,
    function: Function,
    register: u16,
    value: u16,
) -> [u8; REQUEST_LEN] {
    let mut out = [0u8; REQUEST_LEN];
    out[0] = device_address;
    out[1] = function as u8;
    out[2..4].copy_from_slice(&register.to_be_bytes());
    out[4..6].copy_from_slice(&value.to_be_bytes());
    let crc = crc16(&out[..6]);
    out[6..8].copy_from_slice(&crc.to_le_bytes());
    out
}

/// Split `bytes` into payload and trailing CRC, failing if the CRC does not match.
fn check_crc(bytes: &[u8]) -> Result<&[u8], FrameError> {
    if bytes.len() < 3 {
        return Err(FrameError::Truncated(bytes.len()));
    }
    let (payload, trailer) = bytes.split_at(bytes.len() - 2);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let computed = crc16(payload);
    if computed != received {
        return Err(FrameError::Crc { computed, received });
    }
    Ok(payload)
}

/// Decode a reply frame received from the PSU.
///
/// The CRC is checked before anything else, so any corruption surfaces as
/// [`FrameError::Crc`].
pub fn decode_frame(bytes: &[u8]) -> Result<Response, FrameError> {
    let payload = check_crc(bytes)?;
    if payload.len() < 3 {
        return Err(FrameError::Truncated(bytes.len()));
    }

    match payload[1] {
        0x03 => {
            let length = payload[2] as usize;
            let data = &payload[3..];
            if data.len() != length || !(length == 2 || length == 4) {
                return Err(FrameError::Truncated(bytes.len()));
            }
            let registers = data
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            Ok(Response::ReadResult { registers })
        }
        0x06 => {
            if payload.len() != 6 {
                return Err(FrameError::Truncated(bytes.len()));
            }
            Ok(Response::WriteAck {
                register: u16::from_be_bytes([payload[2], payload[3]]),
                value: u16::from_be_bytes([payload[4], payload[5]]),
            })
        }
        ERROR_FUNCTION => Ok(Response::ProtocolError { code: payload[2] }),
        other => Err(FrameError::UnknownFunction(other)),
    }
}

/// Decode a request frame, the inverse of [`encode_frame`].
pub fn decode_request(bytes: &[u8]) -> Result<Frame, FrameError> {
    let payload = check_crc(bytes)?;
    if payload.len() != REQUEST_LEN - 2 {
        return Err(FrameError::Truncated(bytes.len()));
    }
    Ok(Frame {
        device_address: payload[0],
        function: Function::try_from(payload[1])?,
        register: u16::from_be_bytes([payload[2], payload[3]]),
        value: u16::from_be_bytes([payload[4], payload[5]]),
    })
}
