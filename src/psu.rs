use std::sync::Arc;

use strum::IntoEnumIterator;

use crate::{
    error::Result,
    register::{Hm305Register, ProtectionFlags, State},
    session::Session,
    setting::{Parameter, ScaledSetting},
};

/// The voltage and current settings of one PSU.
///
/// Shared between the serial worker, which owns the link, and the fast
/// worker, which only ever touches the caches.
#[derive(Debug)]
pub struct Setpoints {
    pub voltage: ScaledSetting,
    pub current: ScaledSetting,
}

impl Setpoints {
    pub fn hm305() -> Self {
        Self {
            voltage: ScaledSetting::hm305_voltage(),
            current: ScaledSetting::hm305_current(),
        }
    }

    pub fn get(&self, parameter: Parameter) -> &ScaledSetting {
        match parameter {
            Parameter::Voltage => &self.voltage,
            Parameter::Current => &self.current,
        }
    }
}

impl Default for Setpoints {
    fn default() -> Self {
        Self::hm305()
    }
}

/// You can create an Hm305 using any interface which implements [embedded_io::Read] & [embedded_io::Write].
///
/// For its methods, we generally use the nomenclature that "set" means to write a configuration and "get" means to
/// read back a configuration value. Whereas "read" means to get a measured value.
pub struct Hm305<S: embedded_io::Read + embedded_io::Write, const L: usize = 64> {
    session: Session<S, L>,
    setpoints: Arc<Setpoints>,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> Hm305<S, L> {
    /// Create a new Hm305 instance with the given interface and unit ID.
    pub fn new(interface: S, unit_id: u8) -> Self {
        Self::with_setpoints(interface, unit_id, Arc::new(Setpoints::hm305()))
    }

    pub fn with_setpoints(interface: S, unit_id: u8, setpoints: Arc<Setpoints>) -> Self {
        Self {
            session: Session::new(interface, unit_id),
            setpoints,
        }
    }

    /// Handle on the setting caches, for use away from the serial link.
    pub fn setpoints(&self) -> &Arc<Setpoints> {
        &self.setpoints
    }

    pub fn session(&self) -> &Session<S, L> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<S, L> {
        &mut self.session
    }

    /// Seed both setpoint caches and their bounds from the device.
    pub fn initialize(&mut self) -> Result<(), S::Error> {
        for parameter in Parameter::iter() {
            self.setpoints.get(parameter).initialize(&mut self.session)?;
        }
        Ok(())
    }

    /// Return the measured output voltage in volts.
    pub fn read_voltage(&mut self) -> Result<f64, S::Error> {
        self.read_measurement(Parameter::Voltage)
    }

    /// Return the measured output current in amps.
    pub fn read_current(&mut self) -> Result<f64, S::Error> {
        self.read_measurement(Parameter::Current)
    }

    pub fn read_measurement(&mut self, parameter: Parameter) -> Result<f64, S::Error> {
        self.setpoints.get(parameter).read_value(&mut self.session)
    }

    /// Read back the device setpoint. This also refreshes the cache.
    pub fn read_setpoint(&mut self, parameter: Parameter) -> Result<f64, S::Error> {
        self.setpoints.get(parameter).read_setpoint(&mut self.session)
    }

    /// Write the cached setpoint to the device. Returns the value actually written.
    pub fn apply(&mut self, parameter: Parameter) -> Result<f64, S::Error> {
        self.setpoints.get(parameter).apply(&mut self.session)
    }

    /// Clamp and write a setpoint straight to the device.
    pub fn push_setpoint(&mut self, parameter: Parameter, value: f64) -> Result<f64, S::Error> {
        self.setpoints
            .get(parameter)
            .push_setpoint(&mut self.session, value)
    }

    /// Return the measured output power in watts.
    pub fn read_power_w(&mut self) -> Result<f64, S::Error> {
        // raw value in milliwatts.
        let milliwatts = self.read_raw(Hm305Register::Power)?;
        Ok(f64::from(milliwatts) / 1000.0)
    }

    /// Read any register as its raw value, combining two registers where the register is 32 bits wide.
    pub fn read_raw(&mut self, register: Hm305Register) -> Result<u32, S::Error> {
        let registers = self
            .session
            .read_registers(register, register.width().register_count())?;
        Ok(registers
            .iter()
            .fold(0, |raw, &word| (raw << 16) | u32::from(word)))
    }

    /// Enable/disable the output.
    pub fn set_output_state(&mut self, state: impl Into<State>) -> Result<(), S::Error> {
        let state: State = state.into();
        self.session.write_register(Hm305Register::Output, state)?;
        Ok(())
    }

    /// Read whether the output is enabled or disabled.
    pub fn get_output_state(&mut self) -> Result<State, S::Error> {
        let value = self.session.read_register(Hm305Register::Output)?;
        Ok(State::from(value))
    }

    /// Enable/disable the key beep.
    pub fn set_buzzer_state(&mut self, state: impl Into<State>) -> Result<(), S::Error> {
        let state: State = state.into();
        self.session.write_register(Hm305Register::Buzzer, state)?;
        Ok(())
    }

    pub fn get_buzzer_state(&mut self) -> Result<State, S::Error> {
        let value = self.session.read_register(Hm305Register::Buzzer)?;
        Ok(State::from(value))
    }

    /// Read the product model word, e.g. `3010` for an HM310P.
    pub fn get_model(&mut self) -> Result<u16, S::Error> {
        self.session.read_register(Hm305Register::Model)
    }

    /// Read which protections have tripped.
    pub fn get_protection_status(&mut self) -> Result<ProtectionFlags, S::Error> {
        let raw = self.session.read_register(Hm305Register::ProtectionStatus)?;
        Ok(ProtectionFlags::from_raw(raw))
    }

    /// Read the display decimals word.
    ///
    /// `0x233` -> 2 decimals for volts, 3 for amps, 3 for watts.
    pub fn get_decimals(&mut self) -> Result<u16, S::Error> {
        self.session.read_register(Hm305Register::Decimals)
    }
}
