//! Link signal-strength reading.

use bytes::{BufMut, BytesMut};
use polectl_core::error::Result;

use crate::check_len;

/// Received signal strength of the link in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalStrength {
    dbm: i16,
}

impl SignalStrength {
    /// Record length in bytes.
    pub const LEN: usize = 2;

    pub fn from_dbm(dbm: i16) -> Self {
        SignalStrength { dbm }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        check_len(data, Self::LEN)?;
        Ok(SignalStrength {
            dbm: i16::from_le_bytes([data[0], data[1]]),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        buf.put_i16_le(self.dbm);
        buf.to_vec()
    }

    pub fn dbm(&self) -> i16 {
        self.dbm
    }
}
