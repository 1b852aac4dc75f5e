use bitfield_struct::bitfield;
#[cfg(feature = "defmt")]
use defmt::{info, Format};

/// Low nibble of the PRODUCT_ID register.
pub(crate) const DPS310_PRODUCT_ID: u8 = 0x0;

/// Configuration register, address 0x09. Written as a whole byte only to
/// switch the serial interface to 3-wire SPI before any read takes place.
pub(crate) const CFG_REG_ADDR: u8 = 0x09;
/// CFG_REG value selecting 3-wire SPI.
pub(crate) const SPI_3WIRE_ENABLE: u8 = 0x01;

/// Register writes that fix the temperature fuse-bit defect of early silicon.
/// Harmless on parts without the defect.
pub(crate) const TEMPERATURE_ERRATUM_PATCH: [(u8, u8); 5] = [
    (0x0E, 0xA5),
    (0x0F, 0x96),
    (0x62, 0x02),
    (0x0E, 0x00),
    (0x0F, 0x00),
];

/// Oversampling codes above this value need the result shift bit.
pub(crate) const OSR_SHIFT_THRESHOLD: u8 = 0x3;

/// Bus access permitted on a bitfield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Access {
    /// Read only
    ReadOnly,
    /// Write only (reads back as zero)
    WriteOnly,
    /// Read and write
    ReadWrite,
}

/// A sub-byte field inside one byte-addressable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Bitfield {
    /// Register address
    pub address: u8,
    /// Position of the least significant bit of the field
    pub shift: u8,
    /// Width of the field in bits
    pub width: u8,
    /// Permitted access
    pub access: Access,
}

impl Bitfield {
    const fn new(address: u8, shift: u8, width: u8, access: Access) -> Self {
        Self {
            address,
            shift,
            width,
            access,
        }
    }

    /// Mask of the field bits in register position.
    pub const fn mask(&self) -> u8 {
        ((((1u16 << self.width) - 1) << self.shift) & 0xFF) as u8
    }

    /// Extract the field value from a full register byte.
    pub const fn extract(&self, register: u8) -> u8 {
        (register & self.mask()) >> self.shift
    }

    /// Replace the field bits of `register` with `value`. Bits of `value`
    /// that do not fit the field are dropped.
    pub const fn insert(&self, register: u8, value: u8) -> u8 {
        (register & !self.mask()) | ((value << self.shift) & self.mask())
    }

    pub(crate) const fn writable(&self) -> bool {
        !matches!(self.access, Access::ReadOnly)
    }
}

/// Logical register fields of the DPS310.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Field {
    /// Product identifier, PROD_ID[3:0]
    ProductId,
    /// Silicon revision, PROD_ID[7:4]
    RevisionId,
    /// Pressure measurement rate, PRS_CFG[6:4]
    PressureRate,
    /// Pressure oversampling, PRS_CFG[3:0]
    PressureOversampling,
    /// Temperature measurement rate, TMP_CFG[6:4]
    TemperatureRate,
    /// Temperature oversampling, TMP_CFG[3:0]
    TemperatureOversampling,
    /// Temperature sensor used for measurement, TMP_CFG[7]
    TemperatureSource,
    /// Measurement control opcode, MEAS_CFG[2:0]
    OpMode,
    /// New pressure result available, MEAS_CFG[4]
    PressureReady,
    /// New temperature result available, MEAS_CFG[5]
    TemperatureReady,
    /// Sensor initialization complete, MEAS_CFG[6]
    SensorReady,
    /// Coefficients readable, MEAS_CFG[7]
    CoefficientsReady,
    /// 3-wire SPI select, CFG_REG[0]
    SpiMode,
    /// FIFO enable, CFG_REG[1]
    FifoEnable,
    /// Pressure result shift, CFG_REG[2]
    PressureShift,
    /// Temperature result shift, CFG_REG[3]
    TemperatureShift,
    /// Interrupt on pressure result, CFG_REG[4]
    IrqPressureReady,
    /// Interrupt on temperature result, CFG_REG[5]
    IrqTemperatureReady,
    /// Interrupt on FIFO full, CFG_REG[6]
    IrqFifoFull,
    /// Interrupt pin polarity, CFG_REG[7]
    IrqActiveHigh,
    /// Pressure interrupt flag, INT_STS[0]
    IrqFlagPressure,
    /// Temperature interrupt flag, INT_STS[1]
    IrqFlagTemperature,
    /// FIFO full interrupt flag, INT_STS[2]
    IrqFlagFifoFull,
    /// FIFO empty, FIFO_STS[0]
    FifoEmpty,
    /// FIFO full, FIFO_STS[1]
    FifoFull,
    /// Soft reset sequence, RESET[3:0]
    SoftReset,
    /// FIFO flush, RESET[7]
    FifoFlush,
    /// Temperature sensor the coefficients were calibrated with, COEF_SRCE[7]
    CoefficientSource,
}

impl Field {
    /// Descriptor of this field.
    pub const fn bitfield(self) -> Bitfield {
        use Access::*;
        match self {
            Self::ProductId => Bitfield::new(0x0D, 0, 4, ReadOnly),
            Self::RevisionId => Bitfield::new(0x0D, 4, 4, ReadOnly),
            Self::PressureRate => Bitfield::new(0x06, 4, 3, ReadWrite),
            Self::PressureOversampling => Bitfield::new(0x06, 0, 4, ReadWrite),
            Self::TemperatureRate => Bitfield::new(0x07, 4, 3, ReadWrite),
            Self::TemperatureOversampling => Bitfield::new(0x07, 0, 4, ReadWrite),
            Self::TemperatureSource => Bitfield::new(0x07, 7, 1, ReadWrite),
            Self::OpMode => Bitfield::new(0x08, 0, 3, ReadWrite),
            Self::PressureReady => Bitfield::new(0x08, 4, 1, ReadOnly),
            Self::TemperatureReady => Bitfield::new(0x08, 5, 1, ReadOnly),
            Self::SensorReady => Bitfield::new(0x08, 6, 1, ReadOnly),
            Self::CoefficientsReady => Bitfield::new(0x08, 7, 1, ReadOnly),
            Self::SpiMode => Bitfield::new(0x09, 0, 1, ReadWrite),
            Self::FifoEnable => Bitfield::new(0x09, 1, 1, ReadWrite),
            Self::PressureShift => Bitfield::new(0x09, 2, 1, ReadWrite),
            Self::TemperatureShift => Bitfield::new(0x09, 3, 1, ReadWrite),
            Self::IrqPressureReady => Bitfield::new(0x09, 4, 1, ReadWrite),
            Self::IrqTemperatureReady => Bitfield::new(0x09, 5, 1, ReadWrite),
            Self::IrqFifoFull => Bitfield::new(0x09, 6, 1, ReadWrite),
            Self::IrqActiveHigh => Bitfield::new(0x09, 7, 1, ReadWrite),
            Self::IrqFlagPressure => Bitfield::new(0x0A, 0, 1, ReadOnly),
            Self::IrqFlagTemperature => Bitfield::new(0x0A, 1, 1, ReadOnly),
            Self::IrqFlagFifoFull => Bitfield::new(0x0A, 2, 1, ReadOnly),
            Self::FifoEmpty => Bitfield::new(0x0B, 0, 1, ReadOnly),
            Self::FifoFull => Bitfield::new(0x0B, 1, 1, ReadOnly),
            Self::SoftReset => Bitfield::new(0x0C, 0, 4, WriteOnly),
            Self::FifoFlush => Bitfield::new(0x0C, 7, 1, WriteOnly),
            Self::CoefficientSource => Bitfield::new(0x28, 7, 1, ReadOnly),
        }
    }
}

/// Contiguous multi-byte register ranges read in one burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Block {
    /// PSR_B2..PSR_B0, 24-bit big-endian. Also the FIFO output port.
    Pressure,
    /// TMP_B2..TMP_B0, 24-bit big-endian
    Temperature,
    /// COEF, 18 bytes of packed calibration coefficients
    Coefficients,
}

impl Block {
    /// First register address of the block.
    pub const fn address(self) -> u8 {
        match self {
            Self::Pressure => 0x00,
            Self::Temperature => 0x03,
            Self::Coefficients => 0x10,
        }
    }

    /// Length of the block in bytes.
    pub const fn len(self) -> usize {
        match self {
            Self::Pressure | Self::Temperature => 3,
            Self::Coefficients => COEFFICIENT_BLOCK_LEN,
        }
    }
}

/// Length of the calibration coefficient block.
pub(crate) const COEFFICIENT_BLOCK_LEN: usize = 18;

pub(crate) trait Register {
    const ADDRESS: u8;
    fn from_u8(value: u8) -> Self
    where
        Self: Sized;
}

macro_rules! impl_register {
    ($reg:ident, $addr:expr) => {
        impl Register for $reg {
            const ADDRESS: u8 = $addr;
            #[inline(always)]
            fn from_u8(value: u8) -> Self {
                Self::from(value)
            }
        }
    };
}

#[bitfield(u8)]
#[cfg_attr(feature = "defmt", derive(Format))]
/// Measurement configuration and status register, address 0x08
pub(crate) struct MeasCfg {
    #[bits(3, access = RO)]
    pub meas_ctrl: u8,
    #[bits(1, default = false)]
    _rsvd: bool,
    #[bits(1, access = RO)]
    /// Pressure result ready, cleared when the result is read
    pub prs_ready: bool,
    #[bits(1, access = RO)]
    /// Temperature result ready, cleared when the result is read
    pub tmp_ready: bool,
    #[bits(1, access = RO)]
    /// Sensor initialization complete
    pub sensor_ready: bool,
    #[bits(1, access = RO)]
    /// Coefficients available
    pub coef_ready: bool,
}

impl_register!(MeasCfg, 0x08);

/// Interrupt status, address 0x0A. Clear-on-read.
#[bitfield(u8)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub(crate) struct IrqStatus {
    #[bits(1, access = RO)]
    pub pressure: bool,
    #[bits(1, access = RO)]
    pub temperature: bool,
    #[bits(1, access = RO)]
    pub fifo_full: bool,
    #[bits(5, default = 0)]
    _rsvd: u8,
}

impl_register!(IrqStatus, 0x0A);

/// Product and revision identifier, address 0x0D
pub(crate) struct ProductId(pub(crate) u8);

impl ProductId {
    pub(crate) fn validate(&self) -> bool {
        #[cfg(feature = "defmt")]
        {
            info!("Product ID read: {:#x}", self.0);
        }
        self.0 == DPS310_PRODUCT_ID
    }
}

/// Oversampling (precision) settings
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum Oversampling {
    /// Single sample
    #[default]
    X1 = 0x0,
    /// 2x oversampling, low power
    X2 = 0x1,
    /// 4x oversampling
    X4 = 0x2,
    /// 8x oversampling
    X8 = 0x3,
    /// 16x oversampling, standard. Requires result shift.
    X16 = 0x4,
    /// 32x oversampling. Requires result shift.
    X32 = 0x5,
    /// 64x oversampling, high precision. Requires result shift.
    X64 = 0x6,
    /// 128x oversampling. Requires result shift.
    X128 = 0x7,
}

impl Oversampling {
    pub(crate) const fn into_bits(self) -> u8 {
        self as u8
    }

    /// Compensation scale factor `kT` / `kP` for this oversampling rate.
    pub const fn scale_factor(self) -> u32 {
        match self {
            Self::X1 => 524_288,
            Self::X2 => 1_572_864,
            Self::X4 => 3_670_016,
            Self::X8 => 7_864_320,
            Self::X16 => 253_952,
            Self::X32 => 516_096,
            Self::X64 => 1_040_384,
            Self::X128 => 2_088_960,
        }
    }

    /// Whether the result shift bit must be set for this rate.
    pub const fn requires_shift(self) -> bool {
        self.into_bits() > OSR_SHIFT_THRESHOLD
    }
}

/// Measurement rate in background mode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub enum MeasurementRate {
    /// 1 measurement per second
    #[default]
    Hz1 = 0x0,
    /// 2 measurements per second
    Hz2 = 0x1,
    /// 4 measurements per second
    Hz4 = 0x2,
    /// 8 measurements per second
    Hz8 = 0x3,
    /// 16 measurements per second
    Hz16 = 0x4,
    /// 32 measurements per second
    Hz32 = 0x5,
    /// 64 measurements per second
    Hz64 = 0x6,
    /// 128 measurements per second
    Hz128 = 0x7,
}

impl MeasurementRate {
    pub(crate) const fn into_bits(self) -> u8 {
        self as u8
    }
}
