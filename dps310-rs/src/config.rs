#[cfg(feature = "defmt")]
use defmt::Format;

use crate::{mode::busy_time, MeasurementRate, Oversampling};

/// Rate and precision of one measured quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct SensorConfig {
    /// Measurements per second in background mode.
    pub rate: MeasurementRate,
    /// Samples averaged per measurement.
    pub oversampling: Oversampling,
}

impl SensorConfig {
    /// Create a new rate/oversampling pair.
    pub const fn new(rate: MeasurementRate, oversampling: Oversampling) -> Self {
        Self { rate, oversampling }
    }

    /// Value of the result shift bit that must accompany this setting.
    pub const fn shift_enabled(&self) -> bool {
        self.oversampling.requires_shift()
    }

    /// Conversion time of one background period, in units of 0.1 ms.
    pub(crate) const fn busy_time(&self) -> u32 {
        busy_time(self.rate.into_bits(), self.oversampling.into_bits())
    }

    /// Conversion time of one single-shot measurement, in units of 0.1 ms.
    pub(crate) const fn single_shot_busy_time(&self) -> u32 {
        busy_time(0, self.oversampling.into_bits())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
/// Interrupt sources routed to the SDO/INT pin.
pub struct IrqSources {
    /// FIFO full
    pub fifo_full: bool,
    /// Temperature result ready
    pub temperature_ready: bool,
    /// Pressure result ready
    pub pressure_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
/// Configuration for the DPS310 sensor, applied by `init`.
pub struct Dps310Config {
    pub(crate) temperature: SensorConfig,
    pub(crate) pressure: SensorConfig,
    pub(crate) irq_active_high: Option<bool>,
    pub(crate) irq_sources: Option<IrqSources>,
}

impl Default for Dps310Config {
    /// Standard precision for both quantities.
    /// - Temperature: 4 Hz, 8x oversampling
    /// - Pressure: 4 Hz, 8x oversampling
    /// - Interrupt pin: left at the power-on configuration
    fn default() -> Self {
        Self {
            temperature: SensorConfig::new(MeasurementRate::Hz4, Oversampling::X8),
            pressure: SensorConfig::new(MeasurementRate::Hz4, Oversampling::X8),
            irq_active_high: None,
            irq_sources: None,
        }
    }
}

impl Dps310Config {
    /// Set the temperature rate and oversampling.
    pub fn with_temperature(mut self, rate: MeasurementRate, oversampling: Oversampling) -> Self {
        self.temperature = SensorConfig::new(rate, oversampling);
        self
    }

    /// Set the pressure rate and oversampling.
    pub fn with_pressure(mut self, rate: MeasurementRate, oversampling: Oversampling) -> Self {
        self.pressure = SensorConfig::new(rate, oversampling);
        self
    }

    /// Set the interrupt pin polarity during initialization.
    ///
    /// Ignored on 4-wire SPI, where the pin serves as SDO.
    pub fn with_irq_active_high(mut self, active_high: bool) -> Self {
        self.irq_active_high = Some(active_high);
        self
    }

    /// Enable interrupt sources during initialization.
    ///
    /// Ignored on 4-wire SPI, where the pin serves as SDO.
    pub fn with_irq_sources(mut self, sources: IrqSources) -> Self {
        self.irq_sources = Some(sources);
        self
    }

    /// Get the temperature configuration.
    pub fn temperature(&self) -> SensorConfig {
        self.temperature
    }

    /// Get the pressure configuration.
    pub fn pressure(&self) -> SensorConfig {
        self.pressure
    }
}
