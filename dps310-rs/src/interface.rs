/// Serial link the sensor is attached to.
pub trait Interface {
    /// Whether the SDO/INT pin is free to act as an interrupt output.
    ///
    /// In 4-wire SPI mode the pin carries SDO and interrupts are unavailable.
    fn supports_interrupts(&self) -> bool;

    /// Whether the sensor must be switched to 3-wire SPI before first use.
    fn three_wire(&self) -> bool {
        false
    }
}

/// I2C interface for the DPS310 sensor.
pub struct I2cInterface<I2C> {
    pub(crate) i2c: I2C,
    pub(crate) address: u8,
}

/// SPI interface for the DPS310 sensor.
pub struct SpiInterface<SPI> {
    pub(crate) spi: SPI,
    pub(crate) three_wire: bool,
}

impl<I2C> Interface for I2cInterface<I2C> {
    fn supports_interrupts(&self) -> bool {
        true
    }
}

impl<SPI> Interface for SpiInterface<SPI> {
    fn supports_interrupts(&self) -> bool {
        self.three_wire
    }

    fn three_wire(&self) -> bool {
        self.three_wire
    }
}

/// Set on the register address byte of an SPI read.
pub(crate) const SPI_READ: u8 = 0x80;
/// Mask of the register address byte of an SPI write.
pub(crate) const SPI_WRITE_MASK: u8 = 0x7F;
