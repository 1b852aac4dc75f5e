#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
//! Embassy-compatible driver for the Infineon DPS310 barometric pressure and temperature sensor
//!
//! The driver keeps the sensor's operating mode, the factory calibration
//! coefficients and the most recent temperature reading, and converts raw
//! results into compensated values.
//!
//! Single-shot measurements are started with `measure_temp_once` /
//! `measure_pressure_once` and collected by polling `get_single_result`,
//! which reports [`Dps310Error::Unfinished`] until the sensor is done.
//! Background measurements are started with `start_continuous` and
//! collected in batches from the sensor FIFO with `get_cont_results`.
//!
//! Pressure compensation depends on temperature. The driver uses the most
//! recent temperature it has seen, so measure temperature regularly.
pub use crate::{
    config::{Dps310Config, IrqSources, SensorConfig},
    conversion::{altitude, scale, sign_extend, CalibrationCoefficients, Fixed},
    interface::{I2cInterface, Interface, SpiInterface},
    mode::{Continuous, OperatingMode, Quantity},
    registers::{Access, Bitfield, Block, Field, MeasurementRate, Oversampling},
};

#[cfg(feature = "async")]
mod r#async;
mod config;
mod conversion;
mod interface;
mod mode;
mod registers;
#[cfg(feature = "sync")]
mod sync;

pub use uom::si::f32::{Length, Pressure, ThermodynamicTemperature};
pub use uom::si::length::{foot, meter};
pub use uom::si::pressure::{hectopascal, millibar, pascal};
pub use uom::si::thermodynamic_temperature::degree_celsius;

/// Default I2C address for the DPS310 sensor (SDO pulled high)
pub const DEFAULT_I2C_ADDRESS: u8 = 0x77;
/// Alternative I2C address for the DPS310 sensor (SDO pulled low)
pub const ALTERNATE_I2C_ADDRESS: u8 = 0x76;

#[cfg(feature = "async")]
pub use crate::r#async::AsyncFunctions;
#[cfg(feature = "sync")]
pub use crate::sync::SyncFunctions;

use crate::conversion::{to_pressure, to_temperature};

/// DPS310 barometric pressure and temperature sensor
pub struct Dps310<IFACE, D> {
    iface: IFACE,
    delay: D,
    config: Dps310Config,
    mode: OperatingMode,
    temperature: SensorConfig,
    pressure: SensorConfig,
    coefficients: Option<CalibrationCoefficients>,
    last_temp_scaled: Fixed,
    init_failed: bool,
    product_id: u8,
    revision_id: u8,
}

impl<I2C, D> Dps310<I2cInterface<I2C>, D> {
    /// Create a new instance of the [`Dps310`] device.
    ///
    /// No bus traffic happens until `init` is called.
    ///
    /// # Arguments
    /// * `i2c` - The I2C peripheral to use.
    /// * `address` - The I2C address of the device. Use [`DEFAULT_I2C_ADDRESS`] or [`ALTERNATE_I2C_ADDRESS`].
    /// * `config` - The configuration to apply during initialization.
    /// * `delay` - A delay provider used while waiting for conversions.
    pub fn new_with_i2c(i2c: I2C, address: u8, config: Dps310Config, delay: D) -> Self {
        Self::new(I2cInterface { i2c, address }, config, delay)
    }

    /// Destroy the driver and return the I2C peripheral and delay provider.
    pub fn release(self) -> (I2C, D) {
        (self.iface.i2c, self.delay)
    }
}

impl<SPI, D> Dps310<SpiInterface<SPI>, D> {
    /// Create a new instance of the [`Dps310`] device on a 4-wire SPI bus.
    ///
    /// Interrupts are unavailable in this mode.
    ///
    /// # Arguments
    /// * `spi` - The SPI device to use (mode 0 or 3).
    /// * `config` - The configuration to apply during initialization.
    /// * `delay` - A delay provider used while waiting for conversions.
    pub fn new_with_spi(spi: SPI, config: Dps310Config, delay: D) -> Self {
        Self::new(
            SpiInterface {
                spi,
                three_wire: false,
            },
            config,
            delay,
        )
    }

    /// Create a new instance of the [`Dps310`] device on a 3-wire SPI bus.
    ///
    /// The sensor is switched to 3-wire mode as the first step of `init`.
    pub fn new_with_spi_3wire(spi: SPI, config: Dps310Config, delay: D) -> Self {
        Self::new(
            SpiInterface {
                spi,
                three_wire: true,
            },
            config,
            delay,
        )
    }

    /// Destroy the driver and return the SPI device and delay provider.
    pub fn release(self) -> (SPI, D) {
        (self.iface.spi, self.delay)
    }
}

impl<IFACE, D> Dps310<IFACE, D> {
    fn new(iface: IFACE, config: Dps310Config, delay: D) -> Self {
        Self {
            iface,
            delay,
            config,
            mode: OperatingMode::Idle,
            temperature: SensorConfig::default(),
            pressure: SensorConfig::default(),
            coefficients: None,
            last_temp_scaled: Fixed::ZERO,
            init_failed: false,
            product_id: 0,
            revision_id: 0,
        }
    }

    /// Current operating mode as tracked by the driver.
    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    /// Calibration coefficients decoded by the last successful `init`.
    pub fn coefficients(&self) -> Option<&CalibrationCoefficients> {
        self.coefficients.as_ref()
    }

    /// Product ID read during initialization.
    pub fn product_id(&self) -> u8 {
        self.product_id
    }

    /// Silicon revision read during initialization.
    pub fn revision_id(&self) -> u8 {
        self.revision_id
    }

    /// Scaled value of the most recent temperature reading, used for
    /// pressure compensation. Zero until a temperature has been measured.
    pub fn last_temperature_scale(&self) -> Fixed {
        self.last_temp_scaled
    }

    /// Whether initialization failed. The driver is unusable once this is set.
    pub fn init_failed(&self) -> bool {
        self.init_failed
    }

    /// Committed temperature rate and oversampling.
    pub fn temperature_config(&self) -> SensorConfig {
        self.temperature
    }

    /// Committed pressure rate and oversampling.
    pub fn pressure_config(&self) -> SensorConfig {
        self.pressure
    }

    /// Configuration applied by `init`.
    pub fn config(&self) -> &Dps310Config {
        &self.config
    }

    /// Fail fast once initialization has failed or before it has run.
    fn ready<E>(&self) -> Result<CalibrationCoefficients, Dps310Error<E>> {
        if self.init_failed {
            return Err(Dps310Error::InitFailed);
        }
        self.coefficients.ok_or(Dps310Error::NotInitialized)
    }

    fn settings(&self, quantity: Quantity) -> SensorConfig {
        match quantity {
            Quantity::Temperature => self.temperature,
            Quantity::Pressure => self.pressure,
        }
    }

    fn commit(&mut self, quantity: Quantity, settings: SensorConfig) {
        match quantity {
            Quantity::Temperature => self.temperature = settings,
            Quantity::Pressure => self.pressure = settings,
        }
    }

    /// Compensate a raw reading of either quantity.
    fn compensate(
        &mut self,
        coefficients: &CalibrationCoefficients,
        quantity: Quantity,
        raw: i32,
    ) -> Measurement {
        match quantity {
            Quantity::Temperature => {
                Measurement::Temperature(self.compensate_temperature(coefficients, raw))
            }
            Quantity::Pressure => {
                Measurement::Pressure(self.compensate_pressure(coefficients, raw))
            }
        }
    }

    /// Also refreshes the cached temperature scale used by later pressure readings.
    fn compensate_temperature(
        &mut self,
        coefficients: &CalibrationCoefficients,
        raw: i32,
    ) -> ThermodynamicTemperature {
        let t_scaled = scale(raw, self.temperature.oversampling);
        self.last_temp_scaled = t_scaled;
        to_temperature(coefficients.temperature(t_scaled))
    }

    fn compensate_pressure(&self, coefficients: &CalibrationCoefficients, raw: i32) -> Pressure {
        let p_scaled = scale(raw, self.pressure.oversampling);
        to_pressure(coefficients.pressure(p_scaled, self.last_temp_scaled))
    }
}

/// Errors that can occur when interacting with the DPS310 sensor.
#[derive(Debug, Clone)]
pub enum Dps310Error<CommError> {
    /// Bus communication error
    Comm(CommError),
    /// Initialization failed earlier; the driver no longer touches the bus
    InitFailed,
    /// `init` has not completed yet
    NotInitialized,
    /// Invalid device (wrong product ID)
    InvalidDevice,
    /// Operation not valid in the current operating mode
    TooBusy,
    /// Single-shot result not ready yet, poll again
    Unfinished,
    /// Operation not available on this interface
    Unsupported,
    /// Requested measurement settings cannot be met
    InvalidConfiguration,
    /// Attempted to write a read-only register field
    ReadOnlyField(Field),
}

impl<CommError> From<CommError> for Dps310Error<CommError> {
    fn from(err: CommError) -> Self {
        Dps310Error::Comm(err)
    }
}

impl<CommError> Dps310Error<CommError> {
    /// Integer status code of this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InitFailed | Self::NotInitialized | Self::InvalidDevice => {
                StatusCode::FailInitFailed
            }
            Self::TooBusy => StatusCode::FailTooBusy,
            Self::Unfinished => StatusCode::FailUnfinished,
            Self::Comm(_)
            | Self::Unsupported
            | Self::InvalidConfiguration
            | Self::ReadOnlyField(_) => StatusCode::FailUnknown,
        }
    }
}

/// Integer status taxonomy for callers that prefer plain result codes.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusCode {
    /// Operation succeeded
    Success = 0,
    /// Bus or logic error
    FailUnknown = -1,
    /// Initialization failed or has not run
    FailInitFailed = -2,
    /// Operation invalid for the current operating mode
    FailTooBusy = -3,
    /// Single-shot result not ready yet
    FailUnfinished = -4,
}

impl StatusCode {
    /// Status code of an operation result.
    pub fn of<T, E>(result: &Result<T, Dps310Error<E>>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(e) => e.status_code(),
        }
    }
}

/// Compensated sensor readout
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// Temperature result
    Temperature(ThermodynamicTemperature),
    /// Pressure result
    Pressure(Pressure),
}

impl Measurement {
    /// Temperature value, if this is a temperature result.
    pub fn temperature(self) -> Option<ThermodynamicTemperature> {
        match self {
            Self::Temperature(t) => Some(t),
            Self::Pressure(_) => None,
        }
    }

    /// Pressure value, if this is a pressure result.
    pub fn pressure(self) -> Option<Pressure> {
        match self {
            Self::Pressure(p) => Some(p),
            Self::Temperature(_) => None,
        }
    }
}

/// Number of values written to each buffer by `get_cont_results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ContResults {
    /// Temperature values written
    pub temperature: usize,
    /// Pressure values written
    pub pressure: usize,
}

/// Interrupt flags, cleared by reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptStatus {
    /// FIFO is full
    pub fifo_full: bool,
    /// Temperature result ready
    pub temperature_ready: bool,
    /// Pressure result ready
    pub pressure_ready: bool,
}

/// Sensor readiness flags from MEAS_CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SensorStatus {
    /// Coefficients are readable
    pub coefficients_ready: bool,
    /// Sensor finished its own start-up
    pub sensor_ready: bool,
    /// Temperature result ready
    pub temperature_ready: bool,
    /// Pressure result ready
    pub pressure_ready: bool,
}

/// Upper bound on FIFO drain iterations. The FIFO holds 32 results.
const MAX_LOOPS: usize = 100;
