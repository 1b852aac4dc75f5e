#[cfg(feature = "defmt")]
use defmt::{trace, Format};

use core::ops::{Add, Mul};

use libm::powf;
use uom::si::f32::{Length, Pressure, ThermodynamicTemperature};
use uom::si::length::meter;
use uom::si::pressure::pascal;
use uom::si::thermodynamic_temperature::degree_celsius;

use crate::registers::{Oversampling, COEFFICIENT_BLOCK_LEN};

/// Interpret the low `bits` bits of `raw` as a two's-complement number.
///
/// Bits above the field are ignored. `bits` must be between 1 and 31.
pub const fn sign_extend(raw: u32, bits: u32) -> i32 {
    let value = raw & ((1u32 << bits) - 1);
    if value & (1u32 << (bits - 1)) != 0 {
        (value as i64 - (1i64 << bits)) as i32
    } else {
        value as i32
    }
}

/// Signed fixed-point number with [`Fixed::FRAC_BITS`] fractional bits.
///
/// Multiplication widens to 128 bits before shifting back, so the
/// compensation polynomial never overflows for 24-bit raw inputs and
/// 20-bit coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct Fixed(i64);

impl Fixed {
    /// Number of fractional bits.
    pub const FRAC_BITS: u32 = 20;
    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Integer value.
    pub const fn from_int(value: i32) -> Self {
        Self((value as i64) << Self::FRAC_BITS)
    }

    /// `numerator / denominator`, truncated toward zero at the last
    /// fractional bit.
    pub const fn ratio(numerator: i32, denominator: u32) -> Self {
        Self(((numerator as i64) << Self::FRAC_BITS) / denominator as i64)
    }

    /// Raw representation.
    pub const fn from_bits(bits: i64) -> Self {
        Self(bits)
    }

    /// Raw representation.
    pub const fn to_bits(self) -> i64 {
        self.0
    }

    /// Integer part, truncated toward zero.
    pub const fn trunc(self) -> i32 {
        (self.0 / (1i64 << Self::FRAC_BITS)) as i32
    }

    /// Nearest `f32`.
    pub fn to_f32(self) -> f32 {
        self.0 as f32 / (1u32 << Self::FRAC_BITS) as f32
    }
}

impl Add for Fixed {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Mul for Fixed {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self(((self.0 as i128 * rhs.0 as i128) >> Self::FRAC_BITS) as i64)
    }
}

/// Divide a raw ADC reading by the scale factor of the oversampling rate it
/// was taken with.
pub fn scale(raw: i32, oversampling: Oversampling) -> Fixed {
    Fixed::ratio(raw, oversampling.scale_factor())
}

/// Factory calibration coefficients from the COEF registers (0x10 - 0x21).
///
/// # Datasheet
/// - Section 4.9.1 Calibration coefficients.
/// - Section 8.11 Calibration coefficients registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(Format))]
pub struct CalibrationCoefficients {
    /// `c0 / 2`, 12-bit source
    pub c0_half: i32,
    /// 12-bit
    pub c1: i32,
    /// 20-bit
    pub c00: i32,
    /// 20-bit
    pub c10: i32,
    /// 16-bit
    pub c01: i32,
    /// 16-bit
    pub c11: i32,
    /// 16-bit
    pub c20: i32,
    /// 16-bit
    pub c21: i32,
    /// 16-bit
    pub c30: i32,
}

impl CalibrationCoefficients {
    /// Unpack the 18-byte coefficient block.
    pub fn from_registers(data: &[u8; COEFFICIENT_BLOCK_LEN]) -> Self {
        #[cfg(feature = "defmt")]
        {
            trace!("COEF: {=[u8]:#x}", &data[..]);
        }
        let b = |i: usize| data[i] as u32;

        let c0 = sign_extend((b(0) << 4) | (b(1) >> 4), 12);
        let c1 = sign_extend(((b(1) & 0x0F) << 8) | b(2), 12);
        let c00 = sign_extend((b(3) << 12) | (b(4) << 4) | (b(5) >> 4), 20);
        let c10 = sign_extend(((b(5) & 0x0F) << 16) | (b(6) << 8) | b(7), 20);
        let c01 = sign_extend((b(8) << 8) | b(9), 16);
        let c11 = sign_extend((b(10) << 8) | b(11), 16);
        let c20 = sign_extend((b(12) << 8) | b(13), 16);
        let c21 = sign_extend((b(14) << 8) | b(15), 16);
        let c30 = sign_extend((b(16) << 8) | b(17), 16);

        Self {
            // c0 only ever appears as c0 * 0.5
            c0_half: c0 / 2,
            c1,
            c00,
            c10,
            c01,
            c11,
            c20,
            c21,
            c30,
        }
    }

    /// Compensated temperature in degrees Celsius from a scaled reading.
    pub fn temperature(&self, t_scaled: Fixed) -> Fixed {
        Fixed::from_int(self.c0_half) + Fixed::from_int(self.c1) * t_scaled
    }

    /// Compensated pressure in pascal from a scaled pressure reading and the
    /// scaled temperature of the most recent temperature measurement.
    pub fn pressure(&self, p_scaled: Fixed, t_scaled: Fixed) -> Fixed {
        let c = Fixed::from_int;
        let p = p_scaled;
        let t = t_scaled;
        c(self.c00)
            + p * (c(self.c10) + p * (c(self.c20) + p * c(self.c30)))
            + t * c(self.c01)
            + t * p * (c(self.c11) + p * c(self.c21))
    }
}

/// Convert a fixed-point temperature to a physical quantity.
pub(crate) fn to_temperature(value: Fixed) -> ThermodynamicTemperature {
    ThermodynamicTemperature::new::<degree_celsius>(value.to_f32())
}

/// Convert a fixed-point pressure to a physical quantity.
pub(crate) fn to_pressure(value: Fixed) -> Pressure {
    Pressure::new::<pascal>(value.to_f32())
}

/// Altitude above the level where the pressure equals `sea_level`.
///
/// Uses the international barometric formula, valid in the troposphere.
pub fn altitude(pressure: Pressure, sea_level: Pressure) -> Length {
    let ratio = (pressure / sea_level).value;
    Length::new::<meter>(44_330.0 * (1.0 - powf(ratio, 1.0 / 5.255)))
}
