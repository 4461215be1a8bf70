//! Motor control record.
//!
//! The record carries a signed 16-bit speed whose sign encodes the
//! direction. Two wire shapes exist: the compact 4-byte form without an
//! autostop flag and the extended 5-byte form whose last byte is the
//! autostop flag. Callers name the shape explicitly with [`MotorFormat`]
//! for both encoding and decoding.

use bytes::{BufMut, BytesMut};
use polectl_core::error::{Error, Result};

use crate::check_len;

/// Largest accepted speed magnitude.
pub const MAX_SPEED: u16 = 0x00FF;

/// Direction of travel on the pole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorDirection {
    Up,
    Down,
    Stopped,
}

impl MotorDirection {
    /// Sign multiplier applied to the speed on the wire.
    pub fn sign(self) -> i16 {
        match self {
            MotorDirection::Up => 1,
            MotorDirection::Down => -1,
            MotorDirection::Stopped => 0,
        }
    }
}

/// Wire shape of a motor control record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorFormat {
    /// `[key_lo, key_hi, speed_lo, speed_hi]`
    Compact,
    /// `[key_lo, key_hi, speed_lo, speed_hi, autostop]`
    #[default]
    Extended,
}

impl MotorFormat {
    pub fn len(self) -> usize {
        match self {
            MotorFormat::Compact => 4,
            MotorFormat::Extended => 5,
        }
    }
}

/// A motor setting: speed magnitude, direction, and whether the robot
/// should stop on its own at a limit switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorControl {
    speed: u16,
    direction: MotorDirection,
    autostop: bool,
    write_key: u16,
}

impl MotorControl {
    /// Build a writable setting.
    ///
    /// `speed` must not exceed [`MAX_SPEED`], and must be zero exactly when
    /// `direction` is [`MotorDirection::Stopped`].
    pub fn new(
        speed: u16,
        direction: MotorDirection,
        autostop: bool,
        write_key: u16,
    ) -> Result<Self> {
        if speed > MAX_SPEED {
            return Err(Error::FieldOutOfRange("motor speed"));
        }
        match direction {
            MotorDirection::Stopped if speed > 0 => {
                return Err(Error::FieldOutOfRange("motor direction"))
            }
            MotorDirection::Up | MotorDirection::Down if speed == 0 => {
                return Err(Error::FieldOutOfRange("motor direction"))
            }
            _ => {}
        }
        Ok(MotorControl {
            speed,
            direction,
            autostop,
            write_key,
        })
    }

    /// A stopped setting.
    pub fn stopped(write_key: u16) -> Self {
        MotorControl {
            speed: 0,
            direction: MotorDirection::Stopped,
            autostop: false,
            write_key,
        }
    }

    /// Decode a record read back from the robot.
    ///
    /// Direction is derived from the sign of the speed field. The compact
    /// form has no autostop byte and decodes with autostop off. Range
    /// invariants are not re-checked here.
    pub fn decode(data: &[u8], format: MotorFormat) -> Result<Self> {
        check_len(data, format.len())?;
        let signed = i16::from_le_bytes([data[2], data[3]]);
        let direction = match signed {
            0 => MotorDirection::Stopped,
            s if s > 0 => MotorDirection::Up,
            _ => MotorDirection::Down,
        };
        let autostop = match format {
            MotorFormat::Compact => false,
            MotorFormat::Extended => data[4] != 0,
        };
        Ok(MotorControl {
            speed: signed.unsigned_abs(),
            direction,
            autostop,
            write_key: 0,
        })
    }

    /// Encode for writing. The compact form drops the autostop flag.
    pub fn to_bytes(&self, format: MotorFormat) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(format.len());
        buf.put_u16_le(self.write_key);
        // Decoded records are not range checked, so wrap rather than overflow.
        buf.put_i16_le((self.speed as i16).wrapping_mul(self.direction.sign()));
        if format == MotorFormat::Extended {
            buf.put_u8(u8::from(self.autostop));
        }
        buf.to_vec()
    }

    pub fn speed(&self) -> u16 {
        self.speed
    }

    pub fn direction(&self) -> MotorDirection {
        self.direction
    }

    pub fn autostop(&self) -> bool {
        self.autostop
    }

    pub fn write_key(&self) -> u16 {
        self.write_key
    }
}
