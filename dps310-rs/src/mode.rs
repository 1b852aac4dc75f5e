#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{conversion::sign_extend, Dps310Error};

/// Bit of the MEAS_CTRL opcode that selects background (continuous) operation.
const BACKGROUND_BIT: u8 = 0x04;

/// Operating mode of the sensor, mirrored from the MEAS_CTRL opcode.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum OperatingMode {
    /// Standby, no measurement running
    #[default]
    Idle = 0x0,
    /// Single pressure measurement pending
    CommandPressure = 0x1,
    /// Single temperature measurement pending
    CommandTemperature = 0x2,
    /// Background pressure measurement into the FIFO
    ContinuousPressure = 0x5,
    /// Background temperature measurement into the FIFO
    ContinuousTemperature = 0x6,
    /// Background pressure and temperature measurement into the FIFO
    ContinuousBoth = 0x7,
}

impl OperatingMode {
    /// MEAS_CTRL opcode.
    pub const fn opcode(self) -> u8 {
        self as u8
    }

    /// Whether results are produced in the background into the FIFO.
    pub const fn is_background(self) -> bool {
        self.opcode() & BACKGROUND_BIT != 0
    }

    /// Quantity a pending single-shot measurement will produce.
    pub(crate) const fn command(self) -> Option<Quantity> {
        match self {
            Self::CommandTemperature => Some(Quantity::Temperature),
            Self::CommandPressure => Some(Quantity::Pressure),
            _ => None,
        }
    }
}

/// Measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Quantity {
    /// Temperature
    Temperature,
    /// Pressure
    Pressure,
}

impl Quantity {
    pub(crate) const fn single_shot(self) -> OperatingMode {
        match self {
            Self::Temperature => OperatingMode::CommandTemperature,
            Self::Pressure => OperatingMode::CommandPressure,
        }
    }
}

/// Selection of quantities measured in background mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Continuous {
    /// Temperature only
    Temperature,
    /// Pressure only
    Pressure,
    /// Temperature and pressure, alternating
    Both,
}

impl Continuous {
    pub(crate) const fn mode(self) -> OperatingMode {
        match self {
            Self::Temperature => OperatingMode::ContinuousTemperature,
            Self::Pressure => OperatingMode::ContinuousPressure,
            Self::Both => OperatingMode::ContinuousBoth,
        }
    }

    pub(crate) const fn measures_temperature(self) -> bool {
        matches!(self, Self::Temperature | Self::Both)
    }

    pub(crate) const fn measures_pressure(self) -> bool {
        matches!(self, Self::Pressure | Self::Both)
    }
}

/// Guard for starting a single-shot or background measurement.
pub(crate) fn ensure_idle<E>(mode: OperatingMode) -> Result<(), Dps310Error<E>> {
    if mode == OperatingMode::Idle {
        Ok(())
    } else {
        Err(Dps310Error::TooBusy)
    }
}

/// Guard for polling a single-shot result.
pub(crate) fn pending_command<E>(mode: OperatingMode) -> Result<Quantity, Dps310Error<E>> {
    mode.command().ok_or(Dps310Error::TooBusy)
}

/// Guard for draining the FIFO.
pub(crate) fn ensure_background<E>(mode: OperatingMode) -> Result<(), Dps310Error<E>> {
    if mode.is_background() {
        Ok(())
    } else {
        Err(Dps310Error::TooBusy)
    }
}

/// Combine a big-endian 24-bit result register triple into a signed value.
pub(crate) fn raw_value(buf: &[u8; 3]) -> i32 {
    sign_extend(u32::from_be_bytes([0, buf[0], buf[1], buf[2]]), 24)
}

/// One entry read from the FIFO output port.
///
/// The least significant bit of every FIFO result tags its type. The tag
/// bit stays part of the raw value.
pub(crate) fn fifo_entry(buf: &[u8; 3]) -> (Quantity, i32) {
    let quantity = if buf[2] & 0x01 == 0 {
        Quantity::Temperature
    } else {
        Quantity::Pressure
    };
    (quantity, raw_value(buf))
}

/// Conversion time of one measurement, in units of 0.1 ms.
pub(crate) const fn busy_time(rate: u8, oversampling: u8) -> u32 {
    let rate = (rate & 0x7) as u32;
    let oversampling = (oversampling & 0x7) as u32;
    (20u32 << rate) + (16u32 << (oversampling + rate))
}

/// Extra wait after the computed conversion time, in ms.
pub(crate) const BUSY_TIME_FAILSAFE_MS: u32 = 10;
/// Upper bound for the summed busy time of background measurements, in 0.1 ms.
pub(crate) const MAX_BUSY_TIME: u32 = (1000 - BUSY_TIME_FAILSAFE_MS) * 10;
