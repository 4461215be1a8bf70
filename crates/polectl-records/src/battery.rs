//! Battery telemetry record.

use bytes::{BufMut, BytesMut};
use polectl_core::error::Result;

use crate::check_len;

/// ADC reference voltage.
pub const V_REF: f64 = 3.3;

/// Ratio of the resistor divider in front of the ADC.
pub const V_DIVIDER: f64 = 0.5;

/// ADC resolution in bits.
pub const ADC_BITS: u32 = 10;

/// Battery voltage as sampled by the robot's 10-bit ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Battery {
    code: u16,
}

impl Battery {
    /// Record length in bytes.
    pub const LEN: usize = 2;

    pub fn from_code(code: u16) -> Self {
        Battery { code }
    }

    /// Decode a 2-byte little-endian ADC code.
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_len(data, Self::LEN)?;
        Ok(Battery {
            code: u16::from_le_bytes([data[0], data[1]]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u16_le(self.code);
        buf.to_vec()
    }

    /// Raw ADC code.
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Battery voltage in volts.
    pub fn volts(&self) -> f64 {
        let full_scale = f64::from((1u32 << ADC_BITS) - 1);
        V_REF * f64::from(self.code) / full_scale / V_DIVIDER
    }
}
