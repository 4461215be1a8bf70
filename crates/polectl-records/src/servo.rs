//! Servo position record, shared by the latch and launcher control points.

use bytes::{BufMut, BytesMut};
use polectl_core::error::{Error, Result};

use crate::check_len;

/// Largest accepted servo angle once the low bit is masked off.
pub const MAX_POSITION: u8 = 180;

/// A latch or launcher servo setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoPosition {
    position: u8,
    write_key: u16,
}

impl ServoPosition {
    /// Record length in bytes.
    pub const LEN: usize = 3;

    /// Build a writable setting.
    ///
    /// The range check masks the low bit before comparing, so 181 is
    /// accepted and 182 is not.
    pub fn new(position: u8, write_key: u16) -> Result<Self> {
        if position & 0xFE > MAX_POSITION {
            return Err(Error::FieldOutOfRange("servo position"));
        }
        Ok(ServoPosition {
            position,
            write_key,
        })
    }

    /// Decode a 3-byte record read back from the robot.
    ///
    /// The key bytes are not echoed meaningfully by the robot and are
    /// ignored; the decoded write key is zero.
    pub fn decode(data: &[u8]) -> Result<Self> {
        check_len(data, Self::LEN)?;
        Ok(ServoPosition {
            position: data[2],
            write_key: 0,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_u16_le(self.write_key);
        buf.put_u8(self.position);
        buf.to_vec()
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn write_key(&self) -> u16 {
        self.write_key
    }
}
