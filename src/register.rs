//! This module is used to define the registers on the HM305 PSUs.

use core::str::FromStr;

use modular_bitfield::prelude::*;
use strum::IntoEnumIterator;
use strum_macros::EnumIter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
#[repr(u16)]
pub enum Hm305Register {
    /// __R/W__ - Switched output.
    /// * `0` - Off.
    /// * `1` - On.
    Output = 0x0001,
    /// __R__ - Protection status.
    ///
    /// See [`ProtectionFlags`] for the bit layout.
    ProtectionStatus = 0x0002,
    /// __R__ - Product model.
    Model = 0x0003,
    /// __R__ - Class detail. Reads back `"KP"` on the units seen so far.
    ClassDetail = 0x0004,
    /// __R__ - Decimal places for V/A/P, one nibble each.
    ///
    /// `0x233` => 2 decimals for volts, 3 for amps and watts.
    Decimals = 0x0005,
    /// __R__ - Output voltage display value, centivolts.
    Voltage = 0x0010,
    /// __R__ - Output current display value, milliamps.
    Current = 0x0011,
    /// __R__ - Output power display value, milliwatts. 32 bits over two registers.
    Power = 0x0012,
    /// __R/W__ - Calculated power. 32 bits over two registers.
    PowerCal = 0x0014,
    /// __R__ - Over-voltage protection level.
    ProtectVoltage = 0x0020,
    /// __R__ - Over-current protection level.
    ProtectCurrent = 0x0021,
    /// __R__ - Over-power protection level. 32 bits over two registers.
    ProtectPower = 0x0022,
    /// __R/W__ - Voltage setting, centivolts. E.g. 5.0V => `500`.
    SetVoltage = 0x0030,
    /// __R/W__ - Current setting, milliamps. E.g. 1.5A => `1500`.
    SetCurrent = 0x0031,
    /// __R/W__ - Time span setting.
    SetTimeSpan = 0x0032,
    /// __R/W__ - Device boot state.
    PowerState = 0x8801,
    /// __R/W__ - Default display value.
    DefaultShow = 0x8802,
    /// __R/W__ - Short-circuit protection.
    Scp = 0x8803,
    /// __R/W__ - The buzzer switch.
    Buzzer = 0x8804,
    /// __R/W__ - Device address.
    Device = 0x9999,
    SdTime = 0xCCCC,
    /// __R__ - Lowest settable voltage, centivolts.
    VoltageMin = 0xC110,
    /// __R__ - Highest settable voltage, centivolts. `3200` on a 32V unit.
    VoltageMax = 0xC11E,
    /// __R__ - Lowest settable current, milliamps.
    CurrentMin = 0xC120,
    /// __R__ - Highest settable current, milliamps. `10100` on an HM310P.
    CurrentMax = 0xC12E,
}

/// How many consecutive 16-bit registers make up a value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Width {
    /// Raw `u16`.
    Single,
    /// Two registers combined as `(high << 16) | low`.
    Double,
}

impl Width {
    pub const fn register_count(self) -> u16 {
        match self {
            Width::Single => 1,
            Width::Double => 2,
        }
    }
}

impl Hm305Register {
    pub const fn address(self) -> u16 {
        self as u16
    }

    /// The register at `address`, if it is one we know.
    pub fn from_address(address: u16) -> Option<Self> {
        Self::iter().find(|register| register.address() == address)
    }

    /// Decode rule for this register.
    pub const fn width(self) -> Width {
        match self {
            Hm305Register::Power | Hm305Register::PowerCal | Hm305Register::ProtectPower => {
                Width::Double
            }
            _ => Width::Single,
        }
    }

    /// Whether the PSU accepts writes to this register.
    pub const fn is_writable(self) -> bool {
        matches!(
            self,
            Hm305Register::Output
                | Hm305Register::PowerCal
                | Hm305Register::SetVoltage
                | Hm305Register::SetCurrent
                | Hm305Register::SetTimeSpan
                | Hm305Register::PowerState
                | Hm305Register::DefaultShow
                | Hm305Register::Scp
                | Hm305Register::Buzzer
                | Hm305Register::Device
                | Hm305Register::SdTime
        )
    }
}

impl From<Hm305Register> for u16 {
    fn from(value: Hm305Register) -> Self {
        value as u16
    }
}

/// Used to be less ambiguous and whether something is on or off.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    /// Disabled.
    #[default]
    Off = 0x00,
    /// Enabled.
    On = 0x01,
}

impl From<State> for bool {
    fn from(value: State) -> Self {
        match value {
            State::Off => false,
            State::On => true,
        }
    }
}

impl From<bool> for State {
    fn from(value: bool) -> Self {
        match value {
            true => State::On,
            false => State::Off,
        }
    }
}

impl From<State> for u16 {
    fn from(value: State) -> Self {
        value as u16
    }
}

impl From<u16> for State {
    fn from(value: u16) -> Self {
        State::from(value != 0)
    }
}

impl FromStr for State {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ON") {
            Ok(State::On)
        } else if s.eq_ignore_ascii_case("OFF") {
            Ok(State::Off)
        } else {
            Err(())
        }
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            State::On => f.write_str("ON"),
            State::Off => f.write_str("OFF"),
        }
    }
}

/// "Protection status register", one flag per tripped protection.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionFlags {
    /// Over-voltage protection.
    pub ovp: bool,
    /// Over-current protection.
    pub ocp: bool,
    /// Over-power protection.
    pub opp: bool,
    /// Over-temperature protection.
    pub otp: bool,
    /// Short-circuit protection.
    pub scp: bool,
    #[skip]
    __: B11,
}

impl ProtectionFlags {
    pub fn from_raw(raw: u16) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    /// Names of the tripped protections, in bit order.
    pub fn active(&self) -> impl Iterator<Item = &'static str> {
        [
            (self.ovp(), "OVP"),
            (self.ocp(), "OCP"),
            (self.opp(), "OPP"),
            (self.otp(), "OTP"),
            (self.scp(), "SCP"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
    }
}

impl core::fmt::Display for ProtectionFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut any = false;
        for name in self.active() {
            if any {
                f.write_str(",")?;
            }
            f.write_str(name)?;
            any = true;
        }
        if !any {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}
