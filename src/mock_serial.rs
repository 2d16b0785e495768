//! We use this mocking module in unit tests to emulate a serial port.
//!
//! [`MockSerial`] replays scripted replies, one per written frame.
//! [`SimulatedPsu`] behaves like a real HM305: it decodes requests, keeps a
//! register file and answers with properly framed replies.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    codec::{self, Frame, Function, Response},
    register::Hm305Register,
};

/// Our mock type used to emulate a serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 256>,
    /// Replies handed out one per `write` call
    replies: VecDeque<heapless::Vec<u8, 64>>,
    /// Reply currently being read
    read_buffer: heapless::Vec<u8, 64>,
    /// Current position in the read buffer
    read_position: usize,
    /// Flag to simulate write errors
    should_error_on_write: bool,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

#[derive(Debug)]
pub enum MockSerialError {
    /// Simulated timeout, no more data to read
    Timeout,
    /// Simulated buffer overflow
    BufferOverflow,
    /// Generic simulated error for testing
    SimulatedError,
}

impl core::fmt::Display for MockSerialError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

impl core::error::Error for MockSerialError {}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }

        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;

        // Each request gets the next scripted reply.
        self.read_buffer = self.replies.pop_front().unwrap_or_default();
        self.read_position = 0;

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.should_error_on_write {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.should_error_on_read {
            return Err(MockSerialError::SimulatedError);
        }

        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::Timeout);
        }

        let available_bytes = self.read_buffer.len() - self.read_position;
        let bytes_to_read = core::cmp::min(buf.len(), available_bytes);
        buf[..bytes_to_read].copy_from_slice(
            &self.read_buffer[self.read_position..self.read_position + bytes_to_read],
        );

        self.read_position += bytes_to_read;
        Ok(bytes_to_read)
    }
}

impl MockSerial {
    /// Create a new MockSerial instance with empty buffers
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            replies: VecDeque::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
            should_error_on_write: false,
            should_error_on_read: false,
        }
    }

    /// Queue the bytes returned after the next unanswered write.
    pub fn queue_reply(&mut self, data: &[u8]) {
        let mut reply = heapless::Vec::new();
        reply
            .extend_from_slice(data)
            .expect("scripted reply larger than 64 bytes");
        self.replies.push_back(reply);
    }

    /// Queue a well formed write acknowledgement.
    pub fn queue_write_ack(&mut self, register: impl Into<u16>, value: u16) {
        let ack = Response::WriteAck {
            register: register.into(),
            value,
        };
        self.queue_reply(&ack.encode(0x01));
    }

    /// Queue a well formed single register read reply.
    pub fn queue_read(&mut self, value: u16) {
        let mut registers = heapless::Vec::new();
        registers.push(value).unwrap();
        self.queue_reply(&Response::ReadResult { registers }.encode(0x01));
    }

    /// Get a reference to the data that was written to this mock serial port
    pub fn written_data(&self) -> &[u8] {
        &self.write_buffer
    }

    /// Clear the write buffer
    pub fn clear_written_data(&mut self) {
        self.write_buffer.clear();
    }

    /// Number of scripted replies not yet handed out.
    pub fn pending_replies(&self) -> usize {
        self.replies.len()
    }

    /// Configure whether write operations should fail with an error
    pub fn set_write_error(&mut self, should_error: bool) {
        self.should_error_on_write = should_error;
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

/// Register file and bookkeeping shared between a [`SimulatedPsu`] and the test.
#[derive(Default)]
pub struct SimState {
    pub registers: HashMap<u16, u16>,
    /// Every request frame received, in order.
    pub frames: Vec<Frame>,
    /// Flip one bit of the next reply.
    pub corrupt_next_reply: bool,
    /// Pretend each exchange takes this long.
    pub delay: Duration,
}

/// A fake HM305 on the other end of the wire.
#[derive(Clone)]
pub struct SimulatedPsu {
    state: Arc<Mutex<SimState>>,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
}

impl embedded_io::ErrorType for SimulatedPsu {
    type Error = MockSerialError;
}

impl SimulatedPsu {
    /// A PSU with a 32V / 10.1A range, output off and 5.00V / 1.000A set.
    pub fn new() -> Self {
        let mut state = SimState::default();
        for (register, value) in [
            (Hm305Register::Output, 0),
            (Hm305Register::ProtectionStatus, 0),
            (Hm305Register::Model, 3010),
            (Hm305Register::Decimals, 0x233),
            (Hm305Register::Voltage, 0),
            (Hm305Register::Current, 0),
            (Hm305Register::SetVoltage, 500),
            (Hm305Register::SetCurrent, 1000),
            (Hm305Register::Buzzer, 1),
            (Hm305Register::VoltageMin, 10),
            (Hm305Register::VoltageMax, 3200),
            (Hm305Register::CurrentMin, 21),
            (Hm305Register::CurrentMax, 10100),
        ] {
            state.registers.insert(register.address(), value);
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            rx: Vec::new(),
            tx: VecDeque::new(),
        }
    }

    /// Handle to the shared register file, usable after the PSU has been moved.
    pub fn state(&self) -> Arc<Mutex<SimState>> {
        Arc::clone(&self.state)
    }

    pub fn register(&self, register: impl Into<u16>) -> Option<u16> {
        self.state.lock().registers.get(&register.into()).copied()
    }

    pub fn set_register(&self, register: impl Into<u16>, value: u16) {
        self.state.lock().registers.insert(register.into(), value);
    }

    fn answer(&mut self, frame: Frame) {
        let (reply, delay) = {
            let mut state = self.state.lock();
            state.frames.push(frame);

            let response = match frame.function {
                Function::Read => {
                    let mut registers = heapless::Vec::new();
                    for offset in 0..frame.value.min(2) {
                        let address = frame.register.wrapping_add(offset);
                        let value = state.registers.get(&address).copied().unwrap_or(0);
                        let _ = registers.push(value);
                    }
                    Response::ReadResult { registers }
                }
                Function::Write => {
                    state.registers.insert(frame.register, frame.value);
                    // Switching the output on drives the live readings to the setpoints.
                    if frame.register == Hm305Register::Output.address() {
                        let (voltage, current) = if frame.value != 0 {
                            (
                                state.registers.get(&Hm305Register::SetVoltage.address()).copied(),
                                state.registers.get(&Hm305Register::SetCurrent.address()).copied(),
                            )
                        } else {
                            (Some(0), Some(0))
                        };
                        state
                            .registers
                            .insert(Hm305Register::Voltage.address(), voltage.unwrap_or(0));
                        state
                            .registers
                            .insert(Hm305Register::Current.address(), current.unwrap_or(0));
                    }
                    Response::WriteAck {
                        register: frame.register,
                        value: frame.value,
                    }
                }
            };

            let mut reply = response.encode(frame.device_address);
            if state.corrupt_next_reply {
                state.corrupt_next_reply = false;
                reply[3] ^= 0x01;
            }
            (reply, state.delay)
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.tx.extend(reply.iter().copied());
    }
}

impl embedded_io::Write for SimulatedPsu {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.rx.extend_from_slice(buf);
        while self.rx.len() >= codec::REQUEST_LEN {
            let request: Vec<u8> = self.rx.drain(..codec::REQUEST_LEN).collect();
            match codec::decode_request(&request) {
                Ok(frame) => self.answer(frame),
                Err(_) => {
                    let reply = Response::ProtocolError {
                        code: codec::CRC_REJECTED,
                    }
                    .encode(request[0]);
                    self.tx.extend(reply.iter().copied());
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for SimulatedPsu {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.tx.is_empty() {
            return Err(MockSerialError::Timeout);
        }
        let count = buf.len().min(self.tx.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Error, Read, Write};

    #[test]
    fn test_new_mock_serial() {
        let mock = MockSerial::new();
        assert_eq!(mock.written_data().len(), 0);
        assert_eq!(mock.pending_replies(), 0);
        assert!(!mock.should_error_on_write);
        assert!(!mock.should_error_on_read);
    }

    #[test]
    fn test_write_multiple_times() {
        let mut mock = MockSerial::new();
        mock.write(b"Hello, ").unwrap();
        mock.write(b"World!").unwrap();
        assert_eq!(mock.written_data(), b"Hello, World!");
    }

    #[test]
    fn test_write_buffer_overflow() {
        let mut mock = MockSerial::new();
        let large_data = vec![0u8; 300]; // Larger than 256 byte capacity

        let result = mock.write(&large_data);
        assert!(matches!(result.unwrap_err(), MockSerialError::BufferOverflow));
    }

    #[test]
    fn test_replies_follow_writes() {
        let mut mock = MockSerial::new();
        mock.queue_reply(b"first");
        mock.queue_reply(b"second");

        let mut buffer = [0u8; 10];
        // Nothing to read before a request was sent.
        assert!(matches!(
            mock.read(&mut buffer).unwrap_err(),
            MockSerialError::Timeout
        ));

        mock.write(b"req").unwrap();
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer[..5], b"first");
        assert!(mock.read(&mut buffer).is_err());

        mock.write(b"req").unwrap();
        assert_eq!(mock.read(&mut buffer).unwrap(), 6);
        assert_eq!(&buffer[..6], b"second");
        assert_eq!(mock.pending_replies(), 0);
    }

    #[test]
    fn test_read_partial_data() {
        let mut mock = MockSerial::new();
        mock.queue_reply(b"Long response data");
        mock.write(b"req").unwrap();

        let mut buffer = [0u8; 5];
        assert_eq!(mock.read(&mut buffer).unwrap(), 5);
        assert_eq!(&buffer, b"Long ");
    }

    #[test]
    fn test_error_flags_toggle() {
        let mut mock = MockSerial::new();

        mock.set_write_error(true);
        assert!(mock.write(b"test").is_err());
        assert!(mock.flush().is_err());

        mock.set_write_error(false);
        mock.queue_reply(b"data");
        assert!(mock.write(b"test").is_ok());

        let mut buffer = [0u8; 10];
        mock.set_read_error(true);
        assert!(mock.read(&mut buffer).is_err());

        mock.set_read_error(false);
        assert!(mock.read(&mut buffer).is_ok());

        mock.clear_written_data();
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn test_error_kinds() {
        assert!(matches!(
            MockSerialError::Timeout.kind(),
            embedded_io::ErrorKind::TimedOut
        ));
        assert!(matches!(
            MockSerialError::BufferOverflow.kind(),
            embedded_io::ErrorKind::OutOfMemory
        ));
        assert!(matches!(
            MockSerialError::SimulatedError.kind(),
            embedded_io::ErrorKind::Other
        ));
    }

    #[test]
    fn test_simulated_psu_answers_reads_and_writes() {
        let mut psu = SimulatedPsu::new();
        let mut buffer = [0u8; 16];

        psu.write(&codec::encode_frame(0x01, Function::Read, 0x0030, 1))
            .unwrap();
        let count = psu.read(&mut buffer).unwrap();
        let mut expected = heapless::Vec::new();
        expected.push(500).unwrap();
        assert_eq!(
            codec::decode_frame(&buffer[..count]).unwrap(),
            Response::ReadResult {
                registers: expected
            }
        );

        psu.write(&codec::encode_frame(0x01, Function::Write, 0x0001, 1))
            .unwrap();
        let count = psu.read(&mut buffer).unwrap();
        assert_eq!(
            codec::decode_frame(&buffer[..count]).unwrap(),
            Response::WriteAck {
                register: 0x0001,
                value: 1
            }
        );
        assert_eq!(psu.register(Hm305Register::Voltage), Some(500));
        assert_eq!(psu.state().lock().frames.len(), 2);
    }

    #[test]
    fn test_simulated_psu_rejects_corrupt_requests() {
        let mut psu = SimulatedPsu::new();
        let mut request = codec::encode_frame(0x01, Function::Read, 0x0030, 1);
        request[7] ^= 0xFF;
        psu.write(&request).unwrap();

        let mut buffer = [0u8; 16];
        let count = psu.read(&mut buffer).unwrap();
        assert_eq!(
            codec::decode_frame(&buffer[..count]).unwrap(),
            Response::ProtocolError { code: 0x08 }
        );
    }
}
