//! Scaled settings: a setpoint register, its live-value register and a software cache.
//!
//! The PSU stores voltage and current as fixed-point integers (centivolts and
//! milliamps on the HM305). A [`ScaledSetting`] converts to and from floating
//! point units and keeps a software copy of the setpoint, so that the cached
//! value can be updated instantly while the hardware write happens later on
//! the serial worker.

use parking_lot::Mutex;
use strum_macros::{Display, EnumIter};
use tracing::debug;

use crate::{error::Result, register::Hm305Register, session::Session};

/// The two parameters with a setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Parameter {
    #[strum(to_string = "voltage")]
    Voltage,
    #[strum(to_string = "current")]
    Current,
}

/// Software side of a setting. Only ever touched with the lock held.
#[derive(Debug, Clone, Copy)]
struct Cache {
    setpoint: f64,
    /// The cached setpoint differs from what was last pushed to hardware.
    dirty: bool,
    min: f64,
    max: f64,
}

/// A setting whose hardware setpoint is mirrored by a software cache.
///
/// The cached setpoint is whichever is more recent: the last value set through
/// [`set_cached_setpoint`](Self::set_cached_setpoint) (or
/// [`increment`](Self::increment)), or the last value read back from the
/// instrument with [`read_setpoint`](Self::read_setpoint).
#[derive(Debug)]
pub struct ScaledSetting {
    value_register: u16,
    setpoint_register: u16,
    /// Raw register units per unit, e.g. `100.0` for centivolts.
    scale: f64,
    min_register: Option<u16>,
    max_register: Option<u16>,
    cache: Mutex<Cache>,
}

impl ScaledSetting {
    /// Defaults used until the device reports its own bounds.
    pub const DEFAULT_MIN: f64 = 0.0;
    pub const DEFAULT_MAX: f64 = 999.0;

    pub fn new(value_register: impl Into<u16>, setpoint_register: impl Into<u16>, scale: f64) -> Self {
        Self {
            value_register: value_register.into(),
            setpoint_register: setpoint_register.into(),
            scale,
            min_register: None,
            max_register: None,
            cache: Mutex::new(Cache {
                setpoint: 0.0,
                dirty: true,
                min: Self::DEFAULT_MIN,
                max: Self::DEFAULT_MAX,
            }),
        }
    }

    /// Read the bounds from these registers during [`initialize`](Self::initialize).
    pub fn with_bound_registers(
        mut self,
        min_register: impl Into<u16>,
        max_register: impl Into<u16>,
    ) -> Self {
        self.min_register = Some(min_register.into());
        self.max_register = Some(max_register.into());
        self
    }

    /// Use fixed bounds instead of device-reported ones.
    pub fn with_bounds(self, min: f64, max: f64) -> Self {
        {
            let mut cache = self.cache.lock();
            cache.min = min;
            cache.max = max;
        }
        self
    }

    /// The HM305 output voltage: centivolts, bounded by the device's reported range.
    pub fn hm305_voltage() -> Self {
        Self::new(Hm305Register::Voltage, Hm305Register::SetVoltage, 100.0)
            .with_bound_registers(Hm305Register::VoltageMin, Hm305Register::VoltageMax)
    }

    /// The HM305 current limit: milliamps, bounded by the device's reported range.
    pub fn hm305_current() -> Self {
        Self::new(Hm305Register::Current, Hm305Register::SetCurrent, 1000.0)
            .with_bound_registers(Hm305Register::CurrentMin, Hm305Register::CurrentMax)
    }

    /// Seed the cache from the instrument setpoint and read the device bounds.
    pub fn initialize<S, const L: usize>(&self, session: &mut Session<S, L>) -> Result<(), S::Error>
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        self.read_setpoint(session)?;
        if let Some(register) = self.min_register {
            let min = self.scaled_reading(session, register)?;
            self.cache.lock().min = min;
        }
        if let Some(register) = self.max_register {
            let max = self.scaled_reading(session, register)?;
            self.cache.lock().max = max;
        }
        Ok(())
    }

    /// Fresh reading of the live value. Never cached.
    pub fn read_value<S, const L: usize>(&self, session: &mut Session<S, L>) -> Result<f64, S::Error>
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        self.scaled_reading(session, self.value_register)
    }

    /// Read the instrument setpoint and make it the cached setpoint.
    pub fn read_setpoint<S, const L: usize>(
        &self,
        session: &mut Session<S, L>,
    ) -> Result<f64, S::Error>
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        let setpoint = self.scaled_reading(session, self.setpoint_register)?;
        let mut cache = self.cache.lock();
        cache.setpoint = setpoint;
        cache.dirty = false;
        Ok(setpoint)
    }

    /// Clamp `setpoint` to the bounds and write it to the instrument.
    ///
    /// This is the only path that writes the setpoint register.
    pub fn push_setpoint<S, const L: usize>(
        &self,
        session: &mut Session<S, L>,
        setpoint: f64,
    ) -> Result<f64, S::Error>
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        let clamped = {
            let mut cache = self.cache.lock();
            let clamped = setpoint.clamp(cache.min, cache.max);
            cache.setpoint = clamped;
            clamped
        };
        self.write_clamped(session, clamped)?;
        Ok(clamped)
    }

    /// Push whatever the cache currently holds.
    pub fn apply<S, const L: usize>(&self, session: &mut Session<S, L>) -> Result<f64, S::Error>
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        let setpoint = self.cached_setpoint();
        self.push_setpoint(session, setpoint)
    }

    /// Software-only update of the cached setpoint.
    pub fn set_cached_setpoint(&self, setpoint: f64) {
        let mut cache = self.cache.lock();
        cache.setpoint = setpoint;
        cache.dirty = true;
    }

    /// Software-only adjustment of the cached setpoint. Returns the new value.
    pub fn increment(&self, delta: f64) -> f64 {
        let mut cache = self.cache.lock();
        cache.setpoint += delta;
        cache.dirty = true;
        cache.setpoint
    }

    pub fn cached_setpoint(&self) -> f64 {
        self.cache.lock().setpoint
    }

    pub fn is_dirty(&self) -> bool {
        self.cache.lock().dirty
    }

    /// Current `(min, max)` bounds.
    pub fn bounds(&self) -> (f64, f64) {
        let cache = self.cache.lock();
        (cache.min, cache.max)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    fn scaled_reading<S, const L: usize>(
        &self,
        session: &mut Session<S, L>,
        register: u16,
    ) -> Result<f64, S::Error>
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        let raw = session.read_register(register)?;
        Ok(f64::from(raw) / self.scale)
    }

    fn write_clamped<S, const L: usize>(
        &self,
        session: &mut Session<S, L>,
        clamped: f64,
    ) -> Result<(), S::Error>
    where
        S: embedded_io::Read + embedded_io::Write,
    {
        let raw = (clamped * self.scale).round().clamp(0.0, f64::from(u16::MAX)) as u16;
        debug!(
            "writing setpoint {} (raw {}) to {:#06x}",
            clamped, raw, self.setpoint_register
        );
        session.write_register(self.setpoint_register, raw)?;

        // A newer software value may have landed while the write was in flight.
        let mut cache = self.cache.lock();
        if cache.setpoint.to_bits() == clamped.to_bits() {
            cache.dirty = false;
        }
        Ok(())
    }
}
