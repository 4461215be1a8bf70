//! Control-point record encoder/decoder.
//!
//! Every control point on the robot holds a fixed-width little-endian
//! record. This crate handles the pure byte-level encoding and decoding of
//! those records; it keeps no state and performs no I/O.
//!
//! # Record formats
//!
//! ```text
//! Battery         [code_lo, code_hi]                         2 bytes
//! RobotPosition   [type, speed(i8), duration]                3 bytes
//! ServoPosition   [key_lo, key_hi, position]                 3 bytes
//! MotorControl    [key_lo, key_hi, speed_lo, speed_hi]       4 bytes (compact)
//!                 [key_lo, key_hi, speed_lo, speed_hi, stop] 5 bytes (extended)
//! SignalStrength  [dbm_lo, dbm_hi]                           2 bytes
//! ```
//!
//! Decoders check the exact length before looking at any field and fail
//! with [`Error::RecordLength`]. Constructors of writable records validate
//! their fields and fail with [`Error::FieldOutOfRange`]; nothing is
//! silently clamped.

pub mod battery;
pub mod motor;
pub mod position;
pub mod servo;
pub mod signal;

pub use battery::Battery;
pub use motor::{MotorControl, MotorDirection, MotorFormat};
pub use position::RobotPosition;
pub use servo::ServoPosition;
pub use signal::SignalStrength;

use polectl_core::error::{Error, Result};

/// Fail with [`Error::RecordLength`] unless `data` is exactly `expected`
/// bytes long.
pub(crate) fn check_len(data: &[u8], expected: usize) -> Result<()> {
    if data.len() != expected {
        return Err(Error::RecordLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}
